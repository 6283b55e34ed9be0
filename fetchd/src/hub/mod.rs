//! Per-job event log and live fan-out.
//!
//! The hub owns an append-only, bounded ring of events per job plus the
//! set of live subscribers. Publishing never blocks: each subscriber has a
//! bounded delivery queue and one that overflows is disconnected (with a
//! [`EventPayload::SubscriberTooSlow`] marker on its stream) instead of
//! stalling the producer. Late subscribers replay retained history first;
//! history that was already evicted is announced with a
//! [`EventPayload::GapDetected`] marker.

pub mod event;

pub use event::{EventPayload, JobEvent};

use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// One live subscriber: a bounded delivery queue plus the flag used to
/// tell its stream why the queue was closed.
struct Subscriber {
    tx: mpsc::Sender<JobEvent>,
    slow: Arc<AtomicBool>,
    /// Lowest sequence this subscriber asked for; events below it are
    /// skipped even when they are published after registration.
    from: u64,
}

/// Event log for a single job.
#[derive(Default)]
struct JobLog {
    next_seq: u64,
    events: VecDeque<JobEvent>,
    subscribers: Vec<Subscriber>,
    terminal: bool,
}

impl JobLog {
    /// Sequence of the oldest retained event, or `next_seq` when empty.
    fn first_retained(&self) -> u64 {
        self.events.front().map_or(self.next_seq, |e| e.sequence)
    }
}

/// The status broadcast hub.
pub struct EventHub {
    ring_capacity: usize,
    subscriber_buffer: usize,
    logs: DashMap<String, JobLog>,
}

impl EventHub {
    /// Create a hub with the given per-job ring capacity and
    /// per-subscriber queue bound.
    pub fn new(ring_capacity: usize, subscriber_buffer: usize) -> Self {
        Self {
            ring_capacity: ring_capacity.max(1),
            subscriber_buffer: subscriber_buffer.max(1),
            logs: DashMap::new(),
        }
    }

    /// Append an event to a job's log and fan it out to live subscribers.
    ///
    /// Returns the assigned sequence number. Eviction drops the oldest
    /// events once the ring is full; a terminal event is never evicted.
    pub fn publish(&self, job_id: &str, payload: EventPayload) -> u64 {
        let mut log = self.logs.entry(job_id.to_string()).or_default();

        let sequence = log.next_seq;
        log.next_seq += 1;
        let event = JobEvent {
            job_id: job_id.to_string(),
            sequence,
            timestamp: Utc::now(),
            payload,
        };
        let terminal = event.payload.is_terminal();

        log.events.push_back(event.clone());
        if terminal {
            log.terminal = true;
        }
        while log.events.len() > self.ring_capacity {
            if log.events.front().is_some_and(|e| e.payload.is_terminal()) {
                break;
            }
            log.events.pop_front();
        }

        log.subscribers.retain(|sub| {
            if event.sequence < sub.from {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    sub.slow.store(true, Ordering::Release);
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
        if terminal {
            // Closing the queues ends every stream after this event.
            log.subscribers.clear();
        }

        sequence
    }

    /// Replay retained history from `from` and stream live events.
    ///
    /// Replay and registration happen under the log lock, so a subscriber
    /// sees every event exactly once, in sequence order. For an already
    /// terminal job the stream ends right after the replayed history.
    pub fn subscribe(&self, job_id: &str, from: u64) -> EventStream {
        let mut log = self.logs.entry(job_id.to_string()).or_default();

        // Replay always fits: the ring never holds more than its capacity.
        let (tx, rx) = mpsc::channel(self.ring_capacity + self.subscriber_buffer);
        let slow = Arc::new(AtomicBool::new(false));

        let first_retained = log.first_retained();
        if from < first_retained {
            let _ = tx.try_send(JobEvent {
                job_id: job_id.to_string(),
                sequence: from,
                timestamp: Utc::now(),
                payload: EventPayload::GapDetected {
                    requested_from: from,
                    first_retained,
                },
            });
        }
        for event in log.events.iter().filter(|e| e.sequence >= from) {
            let _ = tx.try_send(event.clone());
        }

        if !log.terminal {
            log.subscribers.push(Subscriber {
                tx,
                slow: slow.clone(),
                from,
            });
        }

        EventStream {
            rx,
            slow,
            last_delivered: None,
            slow_reported: false,
        }
    }

    /// The retained sequence range for a job: `(first_retained, next_seq)`.
    pub fn retained_range(&self, job_id: &str) -> Option<(u64, u64)> {
        self.logs
            .get(job_id)
            .map(|log| (log.first_retained(), log.next_seq))
    }

    /// Drop a job's log entirely (retention sweep).
    pub fn remove(&self, job_id: &str) {
        self.logs.remove(job_id);
    }
}

/// Ordered event stream handed to one subscriber.
///
/// Ends (`None`) after the job's terminal event has been delivered. A
/// subscriber that fell too far behind is disconnected and sees a final
/// [`EventPayload::SubscriberTooSlow`] marker instead. Dropping the
/// stream unsubscribes without affecting others.
pub struct EventStream {
    rx: mpsc::Receiver<JobEvent>,
    slow: Arc<AtomicBool>,
    last_delivered: Option<u64>,
    slow_reported: bool,
}

impl EventStream {
    /// Next event, in sequence order.
    pub async fn next(&mut self) -> Option<JobEvent> {
        match self.rx.recv().await {
            Some(event) => {
                self.last_delivered = Some(event.sequence);
                if event.payload.is_terminal() {
                    self.rx.close();
                }
                Some(event)
            }
            None => {
                if self.slow.load(Ordering::Acquire) && !self.slow_reported {
                    self.slow_reported = true;
                    return Some(JobEvent {
                        job_id: String::new(),
                        sequence: self.last_delivered.map_or(0, |s| s + 1),
                        timestamp: Utc::now(),
                        payload: EventPayload::SubscriberTooSlow,
                    });
                }
                None
            }
        }
    }
}
