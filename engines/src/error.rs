//! Engine fault taxonomy. Every remote failure is classified here and then
//! folded into job state; the orchestrator never sees a raw transport error.

use thiserror::Error;

use report_parser::ParseError;
use store::{ScanJob, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration error: no retry without admin action.
    #[error("credentials not provided")]
    MissingCredentials,

    /// Configuration error: the engine cannot compare this language.
    #[error("language '{0}' not supported by this engine")]
    UnsupportedLanguage(String),

    /// Transient: retried naturally on the next scheduled invocation.
    #[error("connection to engine failed: {0}")]
    Connect(String),

    /// Transient: the proxy tunnel could not be established.
    #[error("proxy tunnel failed: {0}")]
    Proxy(String),

    /// Remote-side: the engine rejected our credentials.
    #[error("engine rejected credentials")]
    BadCredentials,

    /// Remote-side: the account is no longer valid.
    #[error("engine account expired")]
    ExpiredAccount,

    /// Remote-side: the engine reported an error for this scan.
    #[error("engine error: {0}")]
    Remote(String),

    /// Data corruption: report artifacts are malformed, nothing was applied.
    #[error("corrupted report: {0}")]
    Corrupted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Connection-level faults heal on their own; the scheduler may re-claim
    /// a job that failed this way without an explicit rescan.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Connect(_) | EngineError::Proxy(_) | EngineError::Io(_)
        )
    }

    /// Folds the fault into the job: status becomes `error`, the message is
    /// the human-readable classification, the detail keeps the full text and
    /// transient faults are flagged for automatic retry.
    pub fn fail_job(&self, job: &mut ScanJob) {
        if self.is_transient() {
            job.fail_transient(self.to_string(), format!("{self:?}"));
        } else {
            job.fail(self.to_string(), format!("{self:?}"));
        }
    }
}

impl From<ParseError> for EngineError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Corrupted(msg) => EngineError::Corrupted(msg),
            ParseError::Io(e) => EngineError::Io(e),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            return EngineError::Connect(e.to_string());
        }
        if let Some(status) = e.status() {
            return match status.as_u16() {
                401 => EngineError::BadCredentials,
                402 | 403 => EngineError::ExpiredAccount,
                _ => EngineError::Remote(format!("http status {status}")),
            };
        }
        EngineError::Remote(e.to_string())
    }
}
