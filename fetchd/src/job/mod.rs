//! Job records, requests and the shared registry.

pub mod record;
pub mod request;
pub mod store;

pub use record::{ErrorClass, ExitInfo, JobRecord, JobState, Progress};
pub use request::{FetchOptions, JobRequest};
pub use store::JobStore;
