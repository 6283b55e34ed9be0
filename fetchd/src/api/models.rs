//! Request/response bodies for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::job::JobRecord;

/// Response for a successful job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

/// Retained event-log range for a job, for stream resumption.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventRange {
    /// Oldest sequence still replayable.
    pub first_retained: u64,
    /// Sequence the next event will get.
    pub next: u64,
}

/// A job snapshot plus its event-log range.
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub record: JobRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<EventRange>,
}

/// Body for forwarding input to a running job's tool.
#[derive(Debug, Clone, Deserialize)]
pub struct InputRequest {
    pub input: String,
}

/// Acknowledgement for asynchronous actions (cancel, input).
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedResponse {
    pub job_id: String,
    pub status: &'static str,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub workers: usize,
    pub running: usize,
    pub queued: usize,
}
