//! Scan job state, one record per (assignment, engine), driven through a
//! strictly forward lifecycle by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two known comparison engines. Dispatch is by this closed enum, never
/// by free-form name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineName {
    Jplag,
    Moss,
}

impl fmt::Display for EngineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineName::Jplag => "jplag",
            EngineName::Moss => "moss",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EngineName {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jplag" => Ok(EngineName::Jplag),
            "moss" => Ok(EngineName::Moss),
            other => Err(format!("invalid EngineName: {other}")),
        }
    }
}

/// Lifecycle states of one scan job. Transitions only move forward (skipping
/// intermediate states is allowed for engines with coarser protocols), except
/// that any state may fall into `Error`, and an explicit rescan resets
/// `Finished`/`Error` back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Uploading,
    Scanning,
    Done,
    Downloading,
    Finished,
    Error,
}

impl ScanStatus {
    fn ordinal(self) -> u8 {
        match self {
            ScanStatus::Pending => 0,
            ScanStatus::Uploading => 1,
            ScanStatus::Scanning => 2,
            ScanStatus::Done => 3,
            ScanStatus::Downloading => 4,
            ScanStatus::Finished => 5,
            ScanStatus::Error => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Finished | ScanStatus::Error)
    }

    /// Whether a job may move from `self` to `to` without an explicit rescan.
    pub fn allows(self, to: ScanStatus) -> bool {
        if to == ScanStatus::Error {
            return self != ScanStatus::Error;
        }
        if self == ScanStatus::Error {
            // Errors are re-triable: the next cycle re-claims them for upload.
            return to == ScanStatus::Uploading;
        }
        to.ordinal() > self.ordinal()
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Uploading => "uploading",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Done => "done",
            ScanStatus::Downloading => "downloading",
            ScanStatus::Finished => "finished",
            ScanStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ScanStatus::Pending),
            "uploading" => Ok(ScanStatus::Uploading),
            "scanning" => Ok(ScanStatus::Scanning),
            "done" => Ok(ScanStatus::Done),
            "downloading" => Ok(ScanStatus::Downloading),
            "finished" => Ok(ScanStatus::Finished),
            "error" => Ok(ScanStatus::Error),
            other => Err(format!("invalid ScanStatus: {other}")),
        }
    }
}

/// Persisted lifecycle state of one assignment's scan against one engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub assignment_id: i64,
    pub engine: EngineName,
    pub status: ScanStatus,
    /// Advisory 0-100. Coarse-grained engines only ever report stage jumps.
    pub progress: u8,
    /// Last human-readable status line.
    pub message: String,
    /// Diagnostic detail for the last failure, if any.
    pub error_detail: Option<String>,
    /// Whether the last failure was a connection-level fault that heals on
    /// its own; such jobs may be re-claimed without an explicit rescan.
    #[serde(default)]
    pub transient_error: bool,
    /// Opaque handle returned by the engine, used to poll/cancel/download.
    /// Absent until upload has been accepted remotely.
    pub submission_token: Option<String>,
    /// Version-stamped directory holding downloaded report artifacts.
    pub report_dir: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn new(assignment_id: i64, engine: EngineName) -> Self {
        Self {
            assignment_id,
            engine,
            status: ScanStatus::Pending,
            progress: 0,
            message: "waiting for scan".into(),
            error_detail: None,
            transient_error: false,
            submission_token: None,
            report_dir: None,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (i64, EngineName) {
        (self.assignment_id, self.engine)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the job forward. Invalid transitions are ignored on purpose: a
    /// late worker reporting on an already-advanced job must not rewind it.
    pub fn advance_to(&mut self, status: ScanStatus, message: impl Into<String>) {
        if !self.status.allows(status) {
            return;
        }
        self.status = status;
        self.message = message.into();
        self.transient_error = false;
        if status == ScanStatus::Finished {
            self.progress = 100;
        }
        self.updated_at = Utc::now();
    }

    pub fn set_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
        self.updated_at = Utc::now();
    }

    /// Plain failures settle the job; `fail_transient` marks faults the
    /// scheduler may retry on its own.
    pub fn fail(&mut self, message: impl Into<String>, detail: impl Into<String>) {
        self.status = ScanStatus::Error;
        self.message = message.into();
        self.error_detail = Some(detail.into());
        self.transient_error = false;
        self.updated_at = Utc::now();
    }

    pub fn fail_transient(&mut self, message: impl Into<String>, detail: impl Into<String>) {
        self.fail(message, detail);
        self.transient_error = true;
    }

    /// Explicit rescan request: terminal jobs go back to `Pending` with all
    /// per-attempt state cleared. Mid-flight jobs are left alone.
    pub fn reset_for_rescan(&mut self) {
        if !self.is_terminal() {
            return;
        }
        self.status = ScanStatus::Pending;
        self.progress = 0;
        self.message = "waiting for scan".into();
        self.error_detail = None;
        self.transient_error = false;
        self.submission_token = None;
        self.report_dir = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_move_forward_only() {
        assert!(ScanStatus::Pending.allows(ScanStatus::Uploading));
        assert!(ScanStatus::Uploading.allows(ScanStatus::Scanning));
        // Coarse engines may skip scanning entirely.
        assert!(ScanStatus::Uploading.allows(ScanStatus::Done));
        assert!(ScanStatus::Done.allows(ScanStatus::Downloading));
        assert!(ScanStatus::Downloading.allows(ScanStatus::Finished));

        assert!(!ScanStatus::Scanning.allows(ScanStatus::Uploading));
        assert!(!ScanStatus::Finished.allows(ScanStatus::Pending));
        assert!(!ScanStatus::Done.allows(ScanStatus::Pending));
    }

    #[test]
    fn any_state_may_fail() {
        for s in [
            ScanStatus::Pending,
            ScanStatus::Uploading,
            ScanStatus::Scanning,
            ScanStatus::Done,
            ScanStatus::Downloading,
            ScanStatus::Finished,
        ] {
            assert!(s.allows(ScanStatus::Error), "{s} -> error must hold");
        }
    }

    #[test]
    fn errored_jobs_are_retriable() {
        assert!(ScanStatus::Error.allows(ScanStatus::Uploading));
        assert!(!ScanStatus::Error.allows(ScanStatus::Finished));
    }

    #[test]
    fn rewind_is_ignored() {
        let mut job = ScanJob::new(1, EngineName::Moss);
        job.advance_to(ScanStatus::Scanning, "scanning");
        job.advance_to(ScanStatus::Uploading, "late worker");
        assert_eq!(job.status, ScanStatus::Scanning);
        assert_eq!(job.message, "scanning");
    }

    #[test]
    fn transient_flag_clears_on_advance_and_rescan() {
        let mut job = ScanJob::new(1, EngineName::Moss);
        job.fail_transient("connection to engine failed", "refused");
        assert!(job.transient_error);

        job.advance_to(ScanStatus::Uploading, "retrying");
        assert!(!job.transient_error);

        job.fail_transient("connection to engine failed", "refused");
        job.reset_for_rescan();
        assert!(!job.transient_error);

        let mut settled = ScanJob::new(1, EngineName::Moss);
        settled.fail("corrupted report", "missing <PRE>");
        assert!(!settled.transient_error);
    }

    #[test]
    fn rescan_resets_terminal_jobs_only() {
        let mut job = ScanJob::new(1, EngineName::Jplag);
        job.fail("remote error", "bad input");
        job.reset_for_rescan();
        assert_eq!(job.status, ScanStatus::Pending);
        assert!(job.error_detail.is_none());
        assert!(job.submission_token.is_none());

        let mut mid = ScanJob::new(1, EngineName::Jplag);
        mid.advance_to(ScanStatus::Scanning, "scanning");
        mid.reset_for_rescan();
        assert_eq!(mid.status, ScanStatus::Scanning);
    }
}
