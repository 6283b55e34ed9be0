//! Shared registry of job records.
//!
//! The store is the single owner of every [`JobRecord`]; all mutation goes
//! through it and happens under the record's map entry, so concurrent
//! readers always observe whole records (never a half-applied transition).

use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::job::record::{ExitInfo, JobRecord, JobState, Progress};

/// Thread-safe job registry keyed by job id.
#[derive(Default)]
pub struct JobStore {
    jobs: DashMap<String, JobRecord>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created record.
    pub fn insert(&self, record: JobRecord) {
        self.jobs.insert(record.id.clone(), record);
    }

    /// Snapshot a single record.
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.get(id).map(|entry| entry.clone())
    }

    /// Snapshot all records, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> =
            self.jobs.iter().map(|entry| entry.clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Number of records currently held (any state).
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Apply a state transition under the record lock and return the
    /// updated snapshot.
    pub fn transition(&self, id: &str, next: JobState) -> Result<JobRecord> {
        let mut entry = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| Error::not_found("Job", id))?;
        entry.transition(next)?;
        Ok(entry.clone())
    }

    /// Update the progress of a running job; silently ignored once the
    /// record is terminal (last progress stays frozen).
    pub fn update_progress(&self, id: &str, progress: Progress) {
        if let Some(mut entry) = self.jobs.get_mut(id) {
            entry.update_progress(progress);
        }
    }

    /// Move a job to a terminal state and attach its outcome in one step,
    /// so readers never see a terminal record without exit details (or
    /// the reverse).
    pub fn finalize(
        &self,
        id: &str,
        next: JobState,
        exit_info: ExitInfo,
    ) -> Result<JobRecord> {
        let mut entry = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| Error::not_found("Job", id))?;
        entry.transition(next)?;
        entry.exit_info = Some(exit_info);
        Ok(entry.clone())
    }

    /// Drop terminal records older than the retention window.
    ///
    /// Returns the ids that were removed so callers can clean up
    /// associated state (event logs, tokens).
    pub fn sweep_terminal(&self, retention: Duration) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        let expired: Vec<String> = self
            .jobs
            .iter()
            .filter(|entry| {
                entry.state.is_terminal()
                    && entry.ended_at.is_some_and(|ended| ended < cutoff)
            })
            .map(|entry| entry.id.clone())
            .collect();

        for id in &expired {
            self.jobs.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::request::{FetchOptions, JobRequest};

    fn store_with_job() -> (JobStore, String) {
        let store = JobStore::new();
        let record = JobRecord::new(JobRequest {
            target: "https://music.example.com/album/1".to_string(),
            options: FetchOptions::default(),
        });
        let id = record.id.clone();
        store.insert(record);
        (store, id)
    }

    #[test]
    fn get_returns_snapshot() {
        let (store, id) = store_with_job();
        let snap = store.get(&id).unwrap();
        assert_eq!(snap.state, JobState::Queued);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn transition_unknown_job_is_not_found() {
        let store = JobStore::new();
        let err = store.transition("nope", JobState::Running).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn invalid_transition_leaves_record_intact() {
        let (store, id) = store_with_job();
        let err = store.transition(&id, JobState::Succeeded).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(store.get(&id).unwrap().state, JobState::Queued);
    }

    #[test]
    fn finalize_sets_state_and_outcome_together() {
        let (store, id) = store_with_job();
        store.transition(&id, JobState::Running).unwrap();
        store
            .finalize(
                &id,
                JobState::Failed,
                ExitInfo {
                    exit_code: Some(2),
                    error_class: None,
                    summary: "boom".to_string(),
                    destination: None,
                },
            )
            .unwrap();

        let snap = store.get(&id).unwrap();
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(snap.exit_info.as_ref().unwrap().exit_code, Some(2));

        // A second finalization is an invalid transition and changes nothing.
        let err = store
            .finalize(
                &id,
                JobState::Succeeded,
                ExitInfo {
                    exit_code: Some(0),
                    error_class: None,
                    summary: "late".to_string(),
                    destination: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(store.get(&id).unwrap().state, JobState::Failed);
    }

    #[test]
    fn sweep_removes_only_old_terminal_jobs() {
        let (store, id) = store_with_job();
        store.transition(&id, JobState::Running).unwrap();
        store.transition(&id, JobState::Succeeded).unwrap();

        // Fresh terminal job survives a day-long retention window.
        assert!(store.sweep_terminal(Duration::from_secs(3600)).is_empty());
        // Zero retention expires it immediately.
        let removed = store.sweep_terminal(Duration::ZERO);
        assert_eq!(removed, vec![id]);
        assert!(store.is_empty());
    }

    #[test]
    fn sweep_never_touches_active_jobs() {
        let (store, id) = store_with_job();
        store.transition(&id, JobState::Running).unwrap();
        assert!(store.sweep_terminal(Duration::ZERO).is_empty());
        assert_eq!(store.len(), 1);
    }
}
