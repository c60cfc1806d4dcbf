//! The scan scheduler: drives every (assignment, engine) job through its
//! lifecycle, one stage per tick, with claims going through the job store's
//! compare-and-swap so concurrent schedulers never double-drive a stage.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use common::config::AppConfig;
use engines::{EngineAdapter, Language, ScanContext};
use store::{EngineName, ScanJob, ScanJobStore, ScanStatus, StoreError};

use crate::extraction::{ExtractionError, SubmissionExtractor};

/// One assignment's scan configuration: which engines to run and where the
/// raw submission tree lives.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentScan {
    pub assignment_id: i64,
    pub language: Language,
    pub engines: Vec<EngineName>,
    /// Raw tree `<root>/<studentDir>/<files>`, one directory per student.
    pub submissions_root: PathBuf,
    #[serde(default)]
    pub base_files_dir: Option<PathBuf>,
    /// Replace student directory names with sequential numeric ids.
    #[serde(default)]
    pub anonymize: bool,
}

/// The two adapters, resolved by the closed engine enum.
#[derive(Clone)]
pub struct EngineSet {
    pub moss: Arc<dyn EngineAdapter>,
    pub jplag: Arc<dyn EngineAdapter>,
}

impl EngineSet {
    pub fn resolve(&self, name: EngineName) -> &Arc<dyn EngineAdapter> {
        match name {
            EngineName::Moss => &self.moss,
            EngineName::Jplag => &self.jplag,
        }
    }
}

/// Tracks which assignments need no further scheduling.
#[async_trait]
pub trait ScanSchedule: Send + Sync {
    async fn is_completed(&self, assignment_id: i64) -> bool;
    async fn mark_completed(&self, assignment_id: i64);
    /// Puts a completed assignment back on the schedule (rescan).
    async fn reopen(&self, assignment_id: i64);
}

#[derive(Default)]
pub struct MemoryScanSchedule {
    done: RwLock<HashSet<i64>>,
}

impl MemoryScanSchedule {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanSchedule for MemoryScanSchedule {
    async fn is_completed(&self, assignment_id: i64) -> bool {
        self.done.read().await.contains(&assignment_id)
    }

    async fn mark_completed(&self, assignment_id: i64) {
        self.done.write().await.insert(assignment_id);
    }

    async fn reopen(&self, assignment_id: i64) {
        self.done.write().await.remove(&assignment_id);
    }
}

/// Connection-level faults heal on their own, so those errored jobs are
/// re-claimed automatically. Everything else stays errored until an explicit
/// rescan.
fn wants_retry(job: &ScanJob) -> bool {
    job.status == ScanStatus::Error && job.transient_error
}

fn settled(job: &ScanJob) -> bool {
    job.is_terminal() && !wants_retry(job)
}

pub struct ScanOrchestrator {
    jobs: Arc<dyn ScanJobStore>,
    engines: EngineSet,
    extractor: Arc<dyn SubmissionExtractor>,
    schedule: Arc<dyn ScanSchedule>,
    report_root: PathBuf,
}

impl ScanOrchestrator {
    pub fn new(
        jobs: Arc<dyn ScanJobStore>,
        engines: EngineSet,
        extractor: Arc<dyn SubmissionExtractor>,
        schedule: Arc<dyn ScanSchedule>,
        report_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs,
            engines,
            extractor,
            schedule,
            report_root: report_root.into(),
        }
    }

    /// Runs one scheduling tick for one assignment: ensures jobs exist,
    /// refreshes the extraction tree and moves every engine's job forward by
    /// at most one stage. Safe to call concurrently and repeatedly.
    pub async fn advance(&self, scan: &AssignmentScan) -> Result<(), StoreError> {
        for engine in &scan.engines {
            if self.jobs.get(scan.assignment_id, *engine).await?.is_none() {
                self.jobs
                    .put(ScanJob::new(scan.assignment_id, *engine))
                    .await?;
            }
        }

        let submissions_dir = match self.extractor.extract(scan).await {
            Ok(dir) => dir,
            Err(ExtractionError::InsufficientSubmissions)
            | Err(ExtractionError::MissingContext(_)) => {
                log::debug!(
                    "assignment {}: nothing to scan yet",
                    scan.assignment_id
                );
                return Ok(());
            }
            Err(e) => {
                log::error!("assignment {}: extraction failed: {e}", scan.assignment_id);
                self.fail_all_jobs(scan, &e.to_string()).await?;
                return self.check_completion(scan).await;
            }
        };

        for engine in &scan.engines {
            self.advance_engine(scan, *engine, &submissions_dir).await?;
        }

        self.check_completion(scan).await
    }

    async fn advance_engine(
        &self,
        scan: &AssignmentScan,
        engine: EngineName,
        submissions_dir: &PathBuf,
    ) -> Result<(), StoreError> {
        let aid = scan.assignment_id;
        let Some(job) = self.jobs.get(aid, engine).await? else {
            return Ok(());
        };
        let adapter = self.engines.resolve(engine);
        let ctx = ScanContext {
            assignment_id: aid,
            language: scan.language,
            submissions_dir: submissions_dir.clone(),
            base_files_dir: scan.base_files_dir.clone(),
            report_root: self.report_root.clone(),
        };

        match job.status {
            ScanStatus::Pending => {
                if let Some(claimed) = self
                    .jobs
                    .transition(aid, engine, ScanStatus::Pending, ScanStatus::Uploading, "claimed for upload")
                    .await?
                {
                    let job = adapter.submit(&ctx, claimed).await;
                    self.jobs.put(job).await?;
                }
            }
            ScanStatus::Error if wants_retry(&job) => {
                if let Some(claimed) = self
                    .jobs
                    .transition(aid, engine, ScanStatus::Error, ScanStatus::Uploading, "retrying after connection failure")
                    .await?
                {
                    log::info!("assignment {aid}: retrying {engine} after connection failure");
                    let job = adapter.submit(&ctx, claimed).await;
                    self.jobs.put(job).await?;
                }
            }
            ScanStatus::Scanning => {
                let job = adapter.poll_status(&ctx, job).await;
                self.jobs.put(job).await?;
            }
            ScanStatus::Done => {
                if let Some(claimed) = self
                    .jobs
                    .transition(aid, engine, ScanStatus::Done, ScanStatus::Downloading, "claimed for download")
                    .await?
                {
                    let job = adapter.download(&ctx, claimed).await;
                    let job = if job.status == ScanStatus::Downloading {
                        adapter.parse(&ctx, job).await
                    } else {
                        job
                    };
                    self.jobs.put(job).await?;
                }
            }
            ScanStatus::Downloading => {
                // A previous run crashed between download and parse; the
                // artifacts are already local, so only parsing remains.
                if job.report_dir.is_some() {
                    let job = adapter.parse(&ctx, job).await;
                    self.jobs.put(job).await?;
                }
            }
            // Uploading is owned by an in-flight submit; stale recovery
            // handles the crashed-worker case.
            ScanStatus::Uploading | ScanStatus::Finished | ScanStatus::Error => {}
        }
        Ok(())
    }

    async fn fail_all_jobs(&self, scan: &AssignmentScan, reason: &str) -> Result<(), StoreError> {
        for engine in &scan.engines {
            if let Some(mut job) = self.jobs.get(scan.assignment_id, *engine).await? {
                if !job.is_terminal() {
                    job.fail("extraction failed", reason);
                    self.jobs.put(job).await?;
                }
            }
        }
        Ok(())
    }

    async fn check_completion(&self, scan: &AssignmentScan) -> Result<(), StoreError> {
        for engine in &scan.engines {
            match self.jobs.get(scan.assignment_id, *engine).await? {
                Some(job) if settled(&job) => {}
                _ => return Ok(()),
            }
        }
        if !self.schedule.is_completed(scan.assignment_id).await {
            log::info!("assignment {}: all scans settled", scan.assignment_id);
            self.schedule.mark_completed(scan.assignment_id).await;
        }
        Ok(())
    }

    /// Wait mode: keeps ticking one assignment until every engine settles.
    pub async fn advance_until_terminal(&self, scan: &AssignmentScan) -> Result<(), StoreError> {
        loop {
            self.advance(scan).await?;
            if self.schedule.is_completed(scan.assignment_id).await {
                return Ok(());
            }
            let secs = AppConfig::global().poll_interval_secs;
            tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
        }
    }

    /// One tick over every configured assignment. Per-assignment store errors
    /// are logged and skipped so one broken assignment cannot stall the rest.
    pub async fn process_all(&self, scans: &[AssignmentScan]) {
        for scan in scans {
            if self.schedule.is_completed(scan.assignment_id).await {
                continue;
            }
            if let Err(e) = self.advance(scan).await {
                log::error!("assignment {}: tick failed: {e}", scan.assignment_id);
            }
        }
    }

    pub async fn all_completed(&self, scans: &[AssignmentScan]) -> bool {
        for scan in scans {
            if !self.schedule.is_completed(scan.assignment_id).await {
                return false;
            }
        }
        true
    }

    /// Forces error state onto jobs whose worker died mid-stage. Returns how
    /// many jobs were recovered.
    pub async fn recover_stale_jobs(&self) -> Result<usize, StoreError> {
        let threshold = AppConfig::global().stale_after_minutes;
        let cutoff = Utc::now() - Duration::minutes(threshold);
        let stale = self.jobs.list_stale(cutoff).await?;
        let count = stale.len();
        for mut job in stale {
            log::warn!(
                "scan job {}/{} stalled in {} since {}",
                job.assignment_id,
                job.engine,
                job.status,
                job.updated_at
            );
            job.fail(
                "scan stalled",
                format!("no progress since {}", job.updated_at),
            );
            self.jobs.put(job).await?;
        }
        Ok(count)
    }

    /// Explicit rescan request: cancels the remote submission where the
    /// engine supports it, resets every terminal job back to `pending` and
    /// reopens the assignment for scheduling.
    pub async fn rescan(&self, scan: &AssignmentScan) -> Result<(), StoreError> {
        for engine in &scan.engines {
            if let Some(mut job) = self.jobs.get(scan.assignment_id, *engine).await? {
                self.engines.resolve(*engine).cancel(&job).await;
                job.reset_for_rescan();
                self.jobs.put(job).await?;
            }
        }
        self.schedule.reopen(scan.assignment_id).await;
        Ok(())
    }
}
