//! Service configuration loaded from environment variables.
//!
//! Every knob has a default that works in the container image the service
//! ships in; deployments override via `FETCHD_*` variables (or a `.env`
//! file, loaded by `main`).

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the scheduler and its worker pool.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of worker slots; the single knob bounding concurrent
    /// external-process load.
    pub workers: usize,
    /// Maximum number of jobs admitted but not yet finished queueing.
    pub max_queue_len: usize,
    /// Wall-clock ceiling for a single job.
    pub job_timeout: Duration,
    /// How long a signalled process gets before it is force-killed.
    pub termination_grace: Duration,
    /// Worker wakeup fallback when no queue notification arrives.
    pub poll_interval: Duration,
    /// Per-job event ring capacity in the broadcast hub.
    pub event_buffer: usize,
    /// Per-subscriber delivery queue bound.
    pub subscriber_buffer: usize,
    /// How long terminal jobs (and their event logs) are retained.
    pub retention: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_queue_len: 256,
            job_timeout: Duration::from_secs(3600),
            termination_grace: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            event_buffer: 512,
            subscriber_buffer: 64,
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Configuration for the external acquisition tool.
///
/// Defaults mirror the container layout: cookies and output are volume
/// mounts, the tool binary is on `PATH`.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Tool executable (name resolved via `PATH`, or an absolute path).
    pub binary: String,
    /// Cookie jar handed to the tool; credential material, never logged.
    pub cookies_path: PathBuf,
    /// Destination directory for finished artifacts.
    pub output_dir: PathBuf,
    /// Optional decrypt helper forwarded to the tool.
    pub decrypt_tool_path: Option<PathBuf>,
    /// `TERM` value exported to the child so it renders progress lines.
    pub term: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: "gamdl".to_string(),
            cookies_path: PathBuf::from("/app/config/cookies.txt"),
            output_dir: PathBuf::from("/app/music"),
            decrypt_tool_path: Some(PathBuf::from("/usr/local/bin/mp4decrypt")),
            term: "xterm-256color".to_string(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub tool: ToolConfig,
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(workers) = env_parse::<usize>("FETCHD_WORKERS")
            && workers > 0
        {
            config.orchestrator.workers = workers;
        }
        if let Some(len) = env_parse::<usize>("FETCHD_MAX_QUEUE_LEN")
            && len > 0
        {
            config.orchestrator.max_queue_len = len;
        }
        if let Some(secs) = env_parse::<u64>("FETCHD_JOB_TIMEOUT_SECS") {
            config.orchestrator.job_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("FETCHD_TERMINATION_GRACE_SECS") {
            config.orchestrator.termination_grace = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("FETCHD_EVENT_BUFFER")
            && n > 0
        {
            config.orchestrator.event_buffer = n;
        }
        if let Some(n) = env_parse::<usize>("FETCHD_SUBSCRIBER_BUFFER")
            && n > 0
        {
            config.orchestrator.subscriber_buffer = n;
        }
        if let Some(secs) = env_parse::<u64>("FETCHD_RETENTION_SECS") {
            config.orchestrator.retention = Duration::from_secs(secs);
        }

        if let Some(binary) = env_string("FETCHD_TOOL_BIN") {
            config.tool.binary = binary;
        }
        if let Some(path) = env_string("FETCHD_COOKIES_PATH") {
            config.tool.cookies_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("FETCHD_OUTPUT_DIR") {
            config.tool.output_dir = PathBuf::from(path);
        }
        if let Some(path) = env_string("FETCHD_DECRYPT_TOOL_PATH") {
            config.tool.decrypt_tool_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        config
    }
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|value| value.parse().ok())
}

/// Default worker count: half the available parallelism, minimum one.
///
/// External tools are network/CPU/disk heavy, so saturating every core
/// with one tool each overshoots on small hosts.
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(2)
}
