//! Job management routes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/jobs` | Submit a new job |
//! | GET | `/api/jobs` | List all known jobs |
//! | GET | `/api/jobs/{id}` | Get a single job snapshot |
//! | POST | `/api/jobs/{id}/cancel` | Request cancellation |
//! | POST | `/api/jobs/{id}/input` | Forward a line to the tool's stdin |
//! | GET | `/api/jobs/{id}/stream` | Live event stream (WebSocket) |

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    AcceptedResponse, EventRange, InputRequest, JobResponse, SubmitJobResponse,
};
use crate::api::routes::stream;
use crate::api::server::AppState;
use crate::job::{JobRecord, JobRequest};

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job).get(list_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/cancel", post(cancel_job))
        .route("/{id}/input", post(send_input))
        .route("/{id}/stream", get(stream::job_stream))
}

fn job_response(state: &AppState, record: JobRecord) -> JobResponse {
    let events = state
        .orchestrator
        .event_range(&record.id)
        .map(|(first_retained, next)| EventRange {
            first_retained,
            next,
        });
    JobResponse { record, events }
}

/// Submit a new job.
///
/// # Endpoint
///
/// `POST /api/jobs`
///
/// Validation happens synchronously; acquisition runs in the background.
/// Returns the new job id, `400` for invalid requests or `503` when the
/// queue is full.
async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let job_id = state.orchestrator.submit(request).map_err(ApiError::from)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id })))
}

/// List snapshots of all known jobs (terminal ones bounded by the
/// retention window).
///
/// # Endpoint
///
/// `GET /api/jobs`
async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobResponse>> {
    let jobs = state
        .orchestrator
        .list()
        .into_iter()
        .map(|record| job_response(&state, record))
        .collect();
    Json(jobs)
}

/// Get a single job snapshot.
///
/// # Endpoint
///
/// `GET /api/jobs/{id}`
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let record = state.orchestrator.get(&id).map_err(ApiError::from)?;
    Ok(Json(job_response(&state, record)))
}

/// Request cancellation of a queued or running job.
///
/// # Endpoint
///
/// `POST /api/jobs/{id}/cancel`
///
/// Returns `202`: cancellation of a running job completes asynchronously
/// once the external process has exited. `404` for unknown jobs, `409`
/// when the job already finished.
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    state.orchestrator.cancel(&id).map_err(ApiError::from)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id: id,
            status: "cancelling",
        }),
    ))
}

/// Forward one line of input to a running job's tool process.
///
/// # Endpoint
///
/// `POST /api/jobs/{id}/input`
///
/// Some tools prompt interactively (quality selection, overwrite
/// confirmation); this is the reply channel. `409` when the job has no
/// running process.
async fn send_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<InputRequest>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    state
        .orchestrator
        .send_input(&id, body.input)
        .map_err(ApiError::from)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id: id,
            status: "input_forwarded",
        }),
    ))
}
