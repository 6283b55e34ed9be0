//! API route modules.
//!
//! Organizes routes by resource type.

pub mod health;
pub mod jobs;
pub mod stream;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/jobs", jobs::router())
        .nest("/health", health::router())
        .with_state(state)
}
