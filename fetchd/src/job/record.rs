//! Job record, state machine and terminal outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::job::request::JobRequest;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Admitted, waiting for a worker slot.
    Queued,
    /// An external process is executing on a worker slot.
    Running,
    /// Process exited with code 0.
    Succeeded,
    /// Process exited non-zero, failed to spawn, or timed out.
    Failed,
    /// Cancelled by the user; the process (if any) has exited.
    Cancelled,
}

impl JobState {
    /// Whether this state permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// The legal transition table.
    ///
    /// Anything not listed here is an internal consistency error, never a
    /// client-reachable condition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Cancelled)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Cancelled)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Coarse classification of why a job failed.
///
/// Derived from a best-effort inspection of the tool's output; advisory,
/// never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Credentials rejected or missing (expired cookies, login prompts).
    Auth,
    /// The requested content does not exist or is region-locked.
    ContentUnavailable,
    /// Connectivity problems between the tool and the remote service.
    Network,
    /// The job exceeded its wall-clock ceiling.
    Timeout,
    /// The tool binary could not be started at all.
    SpawnFailed,
    /// Anything we could not recognize.
    Unknown,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Auth => "auth",
            ErrorClass::ContentUnavailable => "content_unavailable",
            ErrorClass::Network => "network",
            ErrorClass::Timeout => "timeout",
            ErrorClass::SpawnFailed => "spawn_failed",
            ErrorClass::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Latest structured progress for a job.
///
/// Frozen once the job reaches a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Stage label emitted by the tool (e.g. "download", "decrypt").
    pub stage: Option<String>,
    /// Percent complete, clamped to 0..=100; `None` while indeterminate.
    pub percent: Option<f32>,
    /// Free-text message from the most recent progress line.
    pub message: String,
    /// Set when the tool reported a lower percent than before within the
    /// same stage.
    #[serde(default)]
    pub non_monotonic: bool,
}

/// Terminal outcome details, populated only in a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Process exit code; `None` when killed by a signal or never spawned.
    pub exit_code: Option<i32>,
    /// Failure classification; `None` on success and cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    /// Human-readable outcome summary.
    pub summary: String,
    /// Destination directory the tool was writing to. Partial output is
    /// left in place on failure for inspection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
}

/// The authoritative in-memory representation of one requested task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique id, assigned at submission; never reused.
    pub id: String,
    /// The validated, immutable client request.
    pub request: JobRequest,
    /// Current lifecycle state.
    pub state: JobState,
    /// Latest known progress.
    pub progress: Progress,
    /// Terminal outcome; `None` until the job ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_info: Option<ExitInfo>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new record in `Queued` with a fresh id.
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            state: JobState::Queued,
            progress: Progress::default(),
            exit_info: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Apply a state transition, updating lifecycle timestamps.
    ///
    /// Illegal transitions return [`Error::InvalidStateTransition`] and
    /// leave the record untouched.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        match next {
            JobState::Running => self.started_at = Some(Utc::now()),
            _ if next.is_terminal() => self.ended_at = Some(Utc::now()),
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    /// Update progress; ignored once terminal so the last value stays
    /// frozen.
    pub fn update_progress(&mut self, progress: Progress) {
        if !self.state.is_terminal() {
            self.progress = progress;
        }
    }
}
