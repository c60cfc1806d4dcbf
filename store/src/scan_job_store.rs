//! Persistence collaborator interface for scan jobs.
//!
//! The status column doubles as the stage baton between scheduler ticks and
//! out-of-process workers, so every claim goes through `transition`, an atomic
//! compare-and-swap. A lost race returns `None` and the caller backs off.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::scan_job::{EngineName, ScanJob, ScanStatus};

#[async_trait]
pub trait ScanJobStore: Send + Sync {
    async fn get(
        &self,
        assignment_id: i64,
        engine: EngineName,
    ) -> Result<Option<ScanJob>, StoreError>;

    async fn put(&self, job: ScanJob) -> Result<(), StoreError>;

    async fn list_for_assignment(&self, assignment_id: i64) -> Result<Vec<ScanJob>, StoreError>;

    /// Atomically moves the job from `from` to `to` and returns the claimed
    /// job. Returns `Ok(None)` when the current status is not `from` (another
    /// worker won the claim) or the transition is not allowed.
    async fn transition(
        &self,
        assignment_id: i64,
        engine: EngineName,
        from: ScanStatus,
        to: ScanStatus,
        message: &str,
    ) -> Result<Option<ScanJob>, StoreError>;

    /// Non-terminal jobs whose last update is older than `older_than`.
    async fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<ScanJob>, StoreError>;

    /// Cascade removal when an assignment's plagiarism configuration is deleted.
    async fn delete_for_assignment(&self, assignment_id: i64) -> Result<(), StoreError>;
}

/// In-memory store used by tests and as the reference CAS semantics.
#[derive(Default)]
pub struct MemoryScanJobStore {
    inner: RwLock<HashMap<(i64, EngineName), ScanJob>>,
}

impl MemoryScanJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanJobStore for MemoryScanJobStore {
    async fn get(
        &self,
        assignment_id: i64,
        engine: EngineName,
    ) -> Result<Option<ScanJob>, StoreError> {
        Ok(self.inner.read().await.get(&(assignment_id, engine)).cloned())
    }

    async fn put(&self, job: ScanJob) -> Result<(), StoreError> {
        self.inner.write().await.insert(job.key(), job);
        Ok(())
    }

    async fn list_for_assignment(&self, assignment_id: i64) -> Result<Vec<ScanJob>, StoreError> {
        let guard = self.inner.read().await;
        let mut jobs: Vec<ScanJob> = guard
            .values()
            .filter(|j| j.assignment_id == assignment_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.engine.to_string());
        Ok(jobs)
    }

    async fn transition(
        &self,
        assignment_id: i64,
        engine: EngineName,
        from: ScanStatus,
        to: ScanStatus,
        message: &str,
    ) -> Result<Option<ScanJob>, StoreError> {
        let mut guard = self.inner.write().await;
        let Some(job) = guard.get_mut(&(assignment_id, engine)) else {
            return Err(StoreError::NotFound(format!(
                "scan job {assignment_id}/{engine}"
            )));
        };
        if job.status != from || !from.allows(to) {
            return Ok(None);
        }
        job.status = to;
        job.message = message.to_string();
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn list_stale(&self, older_than: DateTime<Utc>) -> Result<Vec<ScanJob>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .values()
            .filter(|j| !j.is_terminal() && j.status != ScanStatus::Pending)
            .filter(|j| j.updated_at < older_than)
            .cloned()
            .collect())
    }

    async fn delete_for_assignment(&self, assignment_id: i64) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .retain(|(aid, _), _| *aid != assignment_id);
        Ok(())
    }
}
