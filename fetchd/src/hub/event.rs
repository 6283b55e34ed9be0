//! Event records distributed by the broadcast hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{ExitInfo, JobState, Progress};

/// Payload of a [`JobEvent`], tagged by kind on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    /// Structured progress parsed from tool output.
    Progress(Progress),
    /// A raw output line that did not parse as progress.
    Log { line: String },
    /// A state-machine transition; `exit_info` present on terminal ones.
    StateChange {
        from: Option<JobState>,
        to: JobState,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_info: Option<ExitInfo>,
    },
    /// Synthesized at subscribe time when the requested offset has been
    /// evicted; the subscriber should re-fetch a snapshot to resync.
    GapDetected {
        requested_from: u64,
        first_retained: u64,
    },
    /// Synthesized when a subscriber's delivery queue overflowed and it
    /// was disconnected. Always the last event on that stream.
    SubscriberTooSlow,
}

impl EventPayload {
    /// Whether this event ends the job's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventPayload::StateChange { to, .. } if to.is_terminal())
    }
}

/// One event in a job's ordered log.
///
/// `sequence` is assigned by the hub at append time and is the ordering
/// authority; timestamps are informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_kind_tagged() {
        let event = JobEvent {
            job_id: "j1".to_string(),
            sequence: 7,
            timestamp: Utc::now(),
            payload: EventPayload::Log {
                line: "hello".to_string(),
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "log");
        assert_eq!(value["payload"]["line"], "hello");
        assert_eq!(value["sequence"], 7);

        let back: JobEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn only_terminal_state_changes_end_streams() {
        let queued = EventPayload::StateChange {
            from: None,
            to: JobState::Queued,
            exit_info: None,
        };
        let done = EventPayload::StateChange {
            from: Some(JobState::Running),
            to: JobState::Succeeded,
            exit_info: None,
        };
        assert!(!queued.is_terminal());
        assert!(done.is_terminal());
        assert!(!EventPayload::SubscriberTooSlow.is_terminal());
    }
}
