//! Job admission, the bounded worker pool, and the orchestrator facade.
//!
//! [`Orchestrator`] is the public surface the API layer talks to: submit,
//! query, cancel, input forwarding and event subscription. Internally it
//! owns the queue, the worker pool, the job registry, the broadcast hub
//! and the process adapter. `W` worker tasks each execute at most one
//! external process at a time, so `W` is the single knob bounding
//! concurrent tool load.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::hub::{EventHub, EventPayload, EventStream};
use crate::job::{ExitInfo, JobRecord, JobRequest, JobState, JobStore};
use crate::progress::ParsedLine;
use crate::runner::{ProcessAdapter, ToolCommand};

/// How often the retention sweeper wakes up.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One admitted-but-not-started job.
struct QueuedJob {
    id: String,
    priority: i32,
}

/// The job orchestrator: scheduler, registry, hub and adapter composed
/// behind one facade.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: JobStore,
    hub: EventHub,
    adapter: ProcessAdapter,
    queue: parking_lot::Mutex<VecDeque<QueuedJob>>,
    notify: Notify,
    cancel_tokens: dashmap::DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator for the given tool family.
    ///
    /// Workers are not running until [`start`](Self::start) is called.
    pub fn new(config: OrchestratorConfig, tool: Arc<dyn ToolCommand>) -> Arc<Self> {
        let adapter =
            ProcessAdapter::new(tool, config.job_timeout, config.termination_grace);
        Arc::new(Self {
            store: JobStore::new(),
            hub: EventHub::new(config.event_buffer, config.subscriber_buffer),
            adapter,
            queue: parking_lot::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cancel_tokens: dashmap::DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
            config,
        })
    }

    /// Spawn the worker pool and the retention sweeper.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Orchestrator already stopped; not starting workers");
            return;
        };

        info!(workers = self.config.workers, "Starting worker pool");
        for slot in 0..self.config.workers {
            let this = self.clone();
            join_set.spawn(async move { this.worker_loop(slot).await });
        }
        let this = self.clone();
        join_set.spawn(async move { this.retention_loop().await });
    }

    /// Stop accepting work, terminate running processes, and wait for the
    /// workers to drain.
    pub async fn stop(&self) {
        info!("Stopping orchestrator");
        self.shutdown.cancel();
        for entry in self.cancel_tokens.iter() {
            entry.value().cancel();
        }

        let join_set = { self.tasks.lock().take() };
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }
        info!("Orchestrator stopped");
    }

    // -- public facade ------------------------------------------------------

    /// Validate and admit a new job.
    ///
    /// Never blocks on worker availability; fails only on invalid input or
    /// a full queue.
    pub fn submit(&self, request: JobRequest) -> Result<String> {
        request.validate()?;

        let record = JobRecord::new(request);
        let id = record.id.clone();
        let priority = record.request.options.priority;

        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.config.max_queue_len {
                return Err(Error::QueueFull {
                    depth: queue.len(),
                    limit: self.config.max_queue_len,
                });
            }
            self.store.insert(record);
            self.cancel_tokens
                .insert(id.clone(), CancellationToken::new());

            // Highest priority first; FIFO within a priority.
            let position = queue
                .iter()
                .rposition(|q| q.priority >= priority)
                .map_or(0, |i| i + 1);
            queue.insert(
                position,
                QueuedJob {
                    id: id.clone(),
                    priority,
                },
            );
        }

        self.hub.publish(
            &id,
            EventPayload::StateChange {
                from: None,
                to: JobState::Queued,
                exit_info: None,
            },
        );
        self.notify.notify_one();
        debug!(job_id = %id, priority, "Job admitted");
        Ok(id)
    }

    /// Snapshot one job.
    pub fn get(&self, job_id: &str) -> Result<JobRecord> {
        self.store
            .get(job_id)
            .ok_or_else(|| Error::not_found("Job", job_id))
    }

    /// Snapshot all known jobs, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        self.store.list()
    }

    /// Request cancellation.
    ///
    /// A queued job is removed before it can ever spawn a process. For a
    /// running job the request is asynchronous: the record reaches
    /// `Cancelled` once the process has actually exited.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        let record = self.get(job_id)?;
        if record.state.is_terminal() {
            return Err(Error::AlreadyTerminal {
                id: job_id.to_string(),
                state: record.state.to_string(),
            });
        }

        let removed_from_queue = {
            let mut queue = self.queue.lock();
            match queue.iter().position(|q| q.id == job_id) {
                Some(position) => {
                    queue.remove(position);
                    true
                }
                None => false,
            }
        };

        if removed_from_queue {
            self.finalize_never_started(job_id, "cancelled before start");
        } else if let Some(token) = self.cancel_tokens.get(job_id) {
            token.cancel();
        }
        Ok(())
    }

    /// Forward a line of input to a running job's tool process.
    pub fn send_input(&self, job_id: &str, line: String) -> Result<()> {
        let record = self.get(job_id)?;
        if record.state != JobState::Running || !self.adapter.send_input(job_id, line) {
            return Err(Error::NotRunning {
                id: job_id.to_string(),
                state: record.state.to_string(),
            });
        }
        Ok(())
    }

    /// Subscribe to a job's event stream from the given sequence.
    pub fn subscribe(&self, job_id: &str, from: u64) -> Result<EventStream> {
        self.get(job_id)?;
        Ok(self.hub.subscribe(job_id, from))
    }

    /// Retained event range for a job: `(first_retained, next_seq)`.
    pub fn event_range(&self, job_id: &str) -> Option<(u64, u64)> {
        self.hub.retained_range(job_id)
    }

    /// Jobs admitted but not yet picked up by a worker.
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    /// Jobs currently occupying a worker slot.
    pub fn running_count(&self) -> usize {
        self.store
            .list()
            .iter()
            .filter(|r| r.state == JobState::Running)
            .count()
    }

    /// The configured worker-slot count.
    pub fn workers(&self) -> usize {
        self.config.workers
    }

    // -- worker pool --------------------------------------------------------

    async fn worker_loop(self: Arc<Self>, slot: usize) {
        debug!(slot, "Worker started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            while let Some(queued) = self.dequeue() {
                // One task per job: a panicking supervision path loses only
                // that job, not this worker slot.
                let this = self.clone();
                let job_id = queued.id;
                let supervision =
                    tokio::spawn(async move { this.execute(&job_id).await });
                if let Err(e) = supervision.await {
                    error!(slot, error = %e, "Job supervision task failed");
                }
                if self.shutdown.is_cancelled() {
                    break;
                }
            }
        }
        debug!(slot, "Worker shutting down");
    }

    fn dequeue(&self) -> Option<QueuedJob> {
        self.queue.lock().pop_front()
    }

    /// Run one job to a terminal state on this worker slot.
    async fn execute(&self, job_id: &str) {
        let token = self
            .cancel_tokens
            .get(job_id)
            .map(|t| t.clone())
            .unwrap_or_default();

        // Cancelled after dequeue but before spawn: finish without ever
        // starting a process.
        if token.is_cancelled() {
            self.finalize_never_started(job_id, "cancelled before start");
            return;
        }

        let record = match self.store.transition(job_id, JobState::Running) {
            Ok(record) => record,
            Err(e) => {
                // Registry and queue disagree; an implementation bug, not
                // a user condition.
                error!(job_id, error = %e, "Refusing to run job in unexpected state");
                return;
            }
        };
        self.hub.publish(
            job_id,
            EventPayload::StateChange {
                from: Some(JobState::Queued),
                to: JobState::Running,
                exit_info: None,
            },
        );
        info!(job_id, target = %record.request.target, "Job started");

        let on_event = |line: ParsedLine| match line {
            ParsedLine::Progress(progress) => {
                self.store.update_progress(job_id, progress.clone());
                self.hub.publish(job_id, EventPayload::Progress(progress));
            }
            ParsedLine::Log(line) => {
                if !line.is_empty() {
                    self.hub.publish(job_id, EventPayload::Log { line });
                }
            }
        };

        let outcome = self
            .adapter
            .run(job_id, &record.request, &on_event, token)
            .await;

        match self
            .store
            .finalize(job_id, outcome.state, outcome.exit_info.clone())
        {
            Ok(_) => {
                self.hub.publish(
                    job_id,
                    EventPayload::StateChange {
                        from: Some(JobState::Running),
                        to: outcome.state,
                        exit_info: Some(outcome.exit_info.clone()),
                    },
                );
                info!(
                    job_id,
                    state = %outcome.state,
                    summary = %outcome.exit_info.summary,
                    "Job finished"
                );
            }
            Err(e) => error!(job_id, error = %e, "Failed to record job outcome"),
        }
        self.cancel_tokens.remove(job_id);
    }

    /// Terminal `Cancelled` for a job whose process never spawned.
    fn finalize_never_started(&self, job_id: &str, summary: &str) {
        let exit_info = ExitInfo {
            exit_code: None,
            error_class: None,
            summary: summary.to_string(),
            destination: None,
        };
        match self
            .store
            .finalize(job_id, JobState::Cancelled, exit_info.clone())
        {
            Ok(_) => {
                self.hub.publish(
                    job_id,
                    EventPayload::StateChange {
                        from: Some(JobState::Queued),
                        to: JobState::Cancelled,
                        exit_info: Some(exit_info),
                    },
                );
                info!(job_id, "Job cancelled before start");
            }
            Err(e) => debug!(job_id, error = %e, "Job already finalized"),
        }
        self.cancel_tokens.remove(job_id);
    }

    // -- retention ----------------------------------------------------------

    async fn retention_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            }

            let removed = self.store.sweep_terminal(self.config.retention);
            if !removed.is_empty() {
                info!(count = removed.len(), "Swept expired terminal jobs");
                for job_id in &removed {
                    self.hub.remove(job_id);
                    self.cancel_tokens.remove(job_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FetchOptions;

    struct NeverTool;

    impl ToolCommand for NeverTool {
        fn name(&self) -> &str {
            "never"
        }
        fn build(&self, _request: &JobRequest) -> tokio::process::Command {
            process_utils::tokio_command("/nonexistent/never-run")
        }
        fn destination(&self, _request: &JobRequest) -> Option<std::path::PathBuf> {
            None
        }
    }

    fn orchestrator(config: OrchestratorConfig) -> Arc<Orchestrator> {
        // Workers are intentionally not started; these tests cover
        // admission and queue behavior only.
        Orchestrator::new(config, Arc::new(NeverTool))
    }

    fn request_with_priority(priority: i32) -> JobRequest {
        JobRequest {
            target: "https://music.example.com/album/1".to_string(),
            options: FetchOptions {
                priority,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn submit_rejects_invalid_requests_without_creating_a_job() {
        let orch = orchestrator(OrchestratorConfig::default());
        let err = orch
            .submit(JobRequest {
                target: "not-a-url".to_string(),
                options: FetchOptions::default(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(orch.list().is_empty());
        assert_eq!(orch.queue_depth(), 0);
    }

    #[tokio::test]
    async fn submit_fails_when_the_queue_is_full() {
        let config = OrchestratorConfig {
            max_queue_len: 2,
            ..Default::default()
        };
        let orch = orchestrator(config);

        orch.submit(request_with_priority(0)).unwrap();
        orch.submit(request_with_priority(0)).unwrap();
        let err = orch.submit(request_with_priority(0)).unwrap_err();
        assert!(matches!(err, Error::QueueFull { depth: 2, limit: 2 }));
        // The rejected submission left no record behind.
        assert_eq!(orch.list().len(), 2);
    }

    #[tokio::test]
    async fn queue_orders_by_priority_then_fifo() {
        let orch = orchestrator(OrchestratorConfig::default());
        let low_a = orch.submit(request_with_priority(0)).unwrap();
        let low_b = orch.submit(request_with_priority(0)).unwrap();
        let high = orch.submit(request_with_priority(5)).unwrap();
        let low_c = orch.submit(request_with_priority(0)).unwrap();

        let order: Vec<String> = std::iter::from_fn(|| orch.dequeue())
            .map(|q| q.id)
            .collect();
        assert_eq!(order, vec![high, low_a, low_b, low_c]);
    }

    #[tokio::test]
    async fn cancelling_a_queued_job_removes_it_before_any_spawn() {
        let orch = orchestrator(OrchestratorConfig::default());
        let id = orch.submit(request_with_priority(0)).unwrap();

        orch.cancel(&id).unwrap();

        let record = orch.get(&id).unwrap();
        assert_eq!(record.state, JobState::Cancelled);
        assert!(record.started_at.is_none());
        assert_eq!(orch.queue_depth(), 0);

        // Cancelling again is a terminal-state error.
        let err = orch.cancel(&id).unwrap_err();
        assert!(matches!(err, Error::AlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn cancel_of_unknown_job_is_not_found() {
        let orch = orchestrator(OrchestratorConfig::default());
        assert!(matches!(
            orch.cancel("missing").unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn input_to_a_queued_job_is_rejected() {
        let orch = orchestrator(OrchestratorConfig::default());
        let id = orch.submit(request_with_priority(0)).unwrap();
        let err = orch.send_input(&id, "yes".to_string()).unwrap_err();
        assert!(matches!(err, Error::NotRunning { .. }));
    }

    #[tokio::test]
    async fn queued_cancellation_produces_a_terminal_event() {
        let orch = orchestrator(OrchestratorConfig::default());
        let id = orch.submit(request_with_priority(0)).unwrap();
        orch.cancel(&id).unwrap();

        let mut stream = orch.subscribe(&id, 0).unwrap();
        let mut states = Vec::new();
        while let Some(event) = stream.next().await {
            if let EventPayload::StateChange { to, .. } = event.payload {
                states.push(to);
            }
        }
        assert_eq!(states, vec![JobState::Queued, JobState::Cancelled]);
    }

    #[tokio::test]
    async fn subscribe_to_unknown_job_is_not_found() {
        let orch = orchestrator(OrchestratorConfig::default());
        assert!(orch.subscribe("missing", 0).is_err());
    }
}
