//! Supervised execution of one external tool process per job.
//!
//! The adapter owns the whole child lifecycle: spawn, incremental output
//! streaming, stdin forwarding, cancellation, timeout, and outcome
//! classification. Output is read line-by-line and handed to the caller's
//! event callback; only a short tail is retained for failure
//! classification, so unbounded tool chatter never accumulates in memory.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use process_utils::terminate_gracefully;

use crate::job::{ErrorClass, ExitInfo, JobRequest, JobState};
use crate::progress::{ParsedLine, ProgressParser};
use crate::runner::classify::classify_failure;
use crate::runner::tool::ToolCommand;

/// Output lines kept for failure classification.
const OUTPUT_TAIL_LINES: usize = 64;

/// Queue bound for lines travelling from the reader tasks to the
/// supervision loop.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Queue bound for operator input forwarded to the child's stdin.
const STDIN_CHANNEL_CAPACITY: usize = 8;

/// Terminal outcome of one supervised execution.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// `Succeeded`, `Failed` or `Cancelled`.
    pub state: JobState,
    pub exit_info: ExitInfo,
}

enum StopCause {
    Cancelled,
    TimedOut,
}

/// Runs and supervises external tool processes.
///
/// Exactly one execution is active per job; the scheduler guarantees the
/// pairing.
pub struct ProcessAdapter {
    tool: Arc<dyn ToolCommand>,
    job_timeout: Duration,
    termination_grace: Duration,
    stdin_txs: DashMap<String, mpsc::Sender<String>>,
}

impl ProcessAdapter {
    pub fn new(tool: Arc<dyn ToolCommand>, job_timeout: Duration, termination_grace: Duration) -> Self {
        Self {
            tool,
            job_timeout,
            termination_grace,
            stdin_txs: DashMap::new(),
        }
    }

    /// Forward one line of input to a running job's stdin.
    ///
    /// Returns `false` when the job has no running process (never started,
    /// already exited, or its input queue is full/closed).
    pub fn send_input(&self, job_id: &str, line: String) -> bool {
        match self.stdin_txs.get(job_id) {
            Some(tx) => tx.try_send(line).is_ok(),
            None => false,
        }
    }

    /// Execute the tool for one job and classify the result.
    ///
    /// Each decoded output line is parsed and passed to `on_event` before
    /// the next line is read. Cancellation and timeout both take the
    /// graceful termination path; the returned outcome is only produced
    /// once the process has actually exited.
    pub async fn run(
        &self,
        job_id: &str,
        request: &JobRequest,
        on_event: &(dyn Fn(ParsedLine) + Send + Sync),
        cancel: CancellationToken,
    ) -> Outcome {
        let destination = self.tool.destination(request);

        let mut cmd = self.tool.build(request);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(job_id, tool = self.tool.name(), target = %request.target, "Spawning tool");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(job_id, tool = self.tool.name(), error = %e, "Failed to spawn tool");
                return Outcome {
                    state: JobState::Failed,
                    exit_info: ExitInfo {
                        exit_code: None,
                        error_class: Some(ErrorClass::SpawnFailed),
                        summary: format!("failed to start {}: {e}", self.tool.name()),
                        destination,
                    },
                };
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let (tx, mut rx) = mpsc::channel::<String>(STDIN_CHANNEL_CAPACITY);
            self.stdin_txs.insert(job_id.to_string(), tx);
            tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    if stdin.write_all(line.as_bytes()).await.is_err()
                        || stdin.write_all(b"\n").await.is_err()
                    {
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            });
        }

        let outcome = self.supervise(job_id, &mut child, on_event, cancel, destination).await;
        self.stdin_txs.remove(job_id);
        outcome
    }

    async fn supervise(
        &self,
        job_id: &str,
        child: &mut tokio::process::Child,
        on_event: &(dyn Fn(ParsedLine) + Send + Sync),
        cancel: CancellationToken,
        destination: Option<std::path::PathBuf>,
    ) -> Outcome {
        let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let mut parser = ProgressParser::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(OUTPUT_TAIL_LINES);

        let deadline = tokio::time::sleep(self.job_timeout);
        tokio::pin!(deadline);

        // Pump output until the streams close, cancellation, or timeout.
        let mut stop: Option<StopCause> = None;
        while stop.is_none() {
            tokio::select! {
                _ = cancel.cancelled() => stop = Some(StopCause::Cancelled),
                _ = &mut deadline => stop = Some(StopCause::TimedOut),
                line = line_rx.recv() => match line {
                    Some(line) => {
                        if tail.len() == OUTPUT_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line.clone());
                        on_event(parser.parse_line(&line));
                    }
                    None => break,
                }
            }
        }

        // Closed streams only mean the process is exiting, not that it has
        // exited; keep honoring cancellation and the deadline while
        // reaping it.
        if stop.is_none() {
            tokio::select! {
                status = child.wait() => {
                    return self.exited_outcome(job_id, status, &tail, destination);
                }
                _ = cancel.cancelled() => stop = Some(StopCause::Cancelled),
                _ = &mut deadline => stop = Some(StopCause::TimedOut),
            }
        }

        let cause = stop.expect("loop exits with a stop cause");
        let exit_code = match terminate_gracefully(child, self.termination_grace).await {
            Ok(shutdown) => shutdown.status().code(),
            Err(e) => {
                warn!(job_id, error = %e, "Error terminating tool process");
                None
            }
        };

        match cause {
            StopCause::Cancelled => Outcome {
                state: JobState::Cancelled,
                exit_info: ExitInfo {
                    exit_code,
                    error_class: None,
                    summary: "cancelled; process terminated".to_string(),
                    destination,
                },
            },
            StopCause::TimedOut => Outcome {
                state: JobState::Failed,
                exit_info: ExitInfo {
                    exit_code,
                    error_class: Some(ErrorClass::Timeout),
                    summary: format!(
                        "timed out after {}s; process terminated",
                        self.job_timeout.as_secs()
                    ),
                    destination,
                },
            },
        }
    }

    fn exited_outcome(
        &self,
        job_id: &str,
        status: std::io::Result<std::process::ExitStatus>,
        tail: &VecDeque<String>,
        destination: Option<std::path::PathBuf>,
    ) -> Outcome {
        match status {
            Ok(status) if status.success() => Outcome {
                state: JobState::Succeeded,
                exit_info: ExitInfo {
                    exit_code: Some(0),
                    error_class: None,
                    summary: format!("{} completed successfully", self.tool.name()),
                    destination,
                },
            },
            Ok(status) => {
                let class = classify_failure(tail.iter().map(String::as_str));
                let summary = match status.code() {
                    Some(code) => format!("{} exited with code {code}", self.tool.name()),
                    None => format!("{} was terminated by a signal", self.tool.name()),
                };
                debug!(job_id, %class, "Tool failed");
                Outcome {
                    state: JobState::Failed,
                    exit_info: ExitInfo {
                        exit_code: status.code(),
                        error_class: Some(class),
                        summary,
                        destination,
                    },
                }
            }
            Err(e) => Outcome {
                state: JobState::Failed,
                exit_info: ExitInfo {
                    exit_code: None,
                    error_class: Some(ErrorClass::Unknown),
                    summary: format!("error waiting for {}: {e}", self.tool.name()),
                    destination,
                },
            },
        }
    }
}

/// Forward decoded lines from a child stream into the supervision loop.
async fn read_lines<R: AsyncRead + Unpin>(stream: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::job::{FetchOptions, Progress};
    use parking_lot::Mutex;

    /// Test tool family: runs an inline shell script, ignoring the request.
    struct ScriptTool {
        script: String,
    }

    impl ScriptTool {
        fn new(script: &str) -> Arc<Self> {
            Arc::new(Self {
                script: script.to_string(),
            })
        }
    }

    impl ToolCommand for ScriptTool {
        fn name(&self) -> &str {
            "sh"
        }

        fn build(&self, _request: &JobRequest) -> tokio::process::Command {
            let mut cmd = process_utils::tokio_command("sh");
            cmd.args(["-c", &self.script]);
            cmd
        }

        fn destination(&self, _request: &JobRequest) -> Option<std::path::PathBuf> {
            None
        }
    }

    fn request() -> JobRequest {
        JobRequest {
            target: "https://example.com/x".to_string(),
            options: FetchOptions::default(),
        }
    }

    fn adapter(tool: Arc<dyn ToolCommand>, timeout: Duration) -> ProcessAdapter {
        ProcessAdapter::new(tool, timeout, Duration::from_millis(500))
    }

    fn collect_progress() -> (Arc<Mutex<Vec<Progress>>>, impl Fn(ParsedLine) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |line: ParsedLine| {
                if let ParsedLine::Progress(p) = line {
                    seen.lock().push(p);
                }
            }
        };
        (seen, sink)
    }

    #[tokio::test]
    async fn successful_run_reports_progress_and_succeeds() {
        let tool = ScriptTool::new(
            "printf '[download] 10%%\\n[download] 55%%\\n[download] 100%%\\n'; exit 0",
        );
        let adapter = adapter(tool, Duration::from_secs(10));
        let (seen, sink) = collect_progress();

        let outcome = adapter
            .run("j1", &request(), &sink, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, JobState::Succeeded);
        assert_eq!(outcome.exit_info.exit_code, Some(0));
        let percents: Vec<Option<f32>> = seen.lock().iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![Some(10.0), Some(55.0), Some(100.0)]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed_and_classified() {
        let tool =
            ScriptTool::new("echo 'ERROR: HTTP 401 Unauthorized, check your cookies' >&2; exit 3");
        let adapter = adapter(tool, Duration::from_secs(10));

        let outcome = adapter
            .run("j1", &request(), &|_| {}, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, JobState::Failed);
        assert_eq!(outcome.exit_info.exit_code, Some(3));
        assert_eq!(outcome.exit_info.error_class, Some(ErrorClass::Auth));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_failure() {
        struct MissingTool;
        impl ToolCommand for MissingTool {
            fn name(&self) -> &str {
                "definitely-not-installed"
            }
            fn build(&self, _request: &JobRequest) -> tokio::process::Command {
                process_utils::tokio_command("/nonexistent/definitely-not-installed")
            }
            fn destination(&self, _request: &JobRequest) -> Option<std::path::PathBuf> {
                None
            }
        }

        let adapter = adapter(Arc::new(MissingTool), Duration::from_secs(10));
        let outcome = adapter
            .run("j1", &request(), &|_| {}, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, JobState::Failed);
        assert_eq!(outcome.exit_info.error_class, Some(ErrorClass::SpawnFailed));
    }

    #[tokio::test]
    async fn cancellation_terminates_the_process() {
        let tool = ScriptTool::new("echo started; sleep 30");
        let adapter = adapter(tool, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = adapter.run("j1", &request(), &|_| {}, cancel).await;

        assert_eq!(outcome.state, JobState::Cancelled);
        assert!(outcome.exit_info.error_class.is_none());
        // Well under the 30s the script wanted to sleep.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn hung_process_times_out_as_failed() {
        let tool = ScriptTool::new("sleep 30");
        let adapter = adapter(tool, Duration::from_millis(300));

        let outcome = adapter
            .run("j1", &request(), &|_| {}, CancellationToken::new())
            .await;

        assert_eq!(outcome.state, JobState::Failed);
        assert_eq!(outcome.exit_info.error_class, Some(ErrorClass::Timeout));
    }

    #[tokio::test]
    async fn stdin_lines_reach_the_tool() {
        // Exits 0 only if it reads the expected confirmation line.
        let tool = ScriptTool::new("read answer; [ \"$answer\" = yes ] && exit 0 || exit 7");
        let adapter = Arc::new(adapter(tool, Duration::from_secs(10)));

        let handle = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter
                    .run("j1", &request(), &|_| {}, CancellationToken::new())
                    .await
            })
        };

        // Wait for the process to register its stdin queue.
        for _ in 0..50 {
            if adapter.send_input("j1", "yes".to_string()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn input_to_unknown_job_is_rejected() {
        let adapter = adapter(ScriptTool::new("true"), Duration::from_secs(1));
        assert!(!adapter.send_input("ghost", "hello".to_string()));
    }
}
