//! The uniform capability interface every engine implements.
//!
//! Adapter methods never fail outward: every remote fault is caught at this
//! boundary and converted into job status/message/error detail, so one
//! engine's failure can never abort another's processing.

use async_trait::async_trait;
use std::path::PathBuf;

use store::{EngineName, ScanJob};

use crate::languages::Language;

/// Per-invocation context handed to every adapter call: where the normalized
/// submission tree lives and where report versions are rooted.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub assignment_id: i64,
    pub language: Language,
    /// Normalized tree `<submissions_dir>/<studentId>/<files>`.
    pub submissions_dir: PathBuf,
    /// Optional instructor seed code uploaded as base files.
    pub base_files_dir: Option<PathBuf>,
    /// Root under which version-stamped report directories are created.
    pub report_root: PathBuf,
}

impl ScanContext {
    /// Version-stamped, collision-free report directory for one scan result.
    pub fn report_dir(&self, engine: EngineName, version: u32) -> PathBuf {
        self.report_root
            .join(self.assignment_id.to_string())
            .join(engine.to_string())
            .join(format!("v{version}"))
    }
}

/// Recovers the report version from a version-stamped directory path
/// (`.../v3` -> 3). Inverse of [`ScanContext::report_dir`].
pub fn version_from_report_dir(dir: &str) -> Option<u32> {
    let name = std::path::Path::new(dir).file_name()?.to_str()?;
    name.strip_prefix('v')?.parse().ok()
}

#[async_trait]
pub trait EngineAdapter: Send + Sync {
    fn name(&self) -> EngineName;

    /// Static capability advertisement, used to grey out unsupported
    /// engine/language combinations before scanning starts.
    fn supported_languages(&self) -> &'static [Language];

    /// Pure, side-effect-free renderable reference to the finished result.
    fn display_link(&self, job: &ScanJob) -> Option<String>;

    /// Uploads the submission tree. Must be a no-op returning an errored job
    /// when credentials are not configured.
    async fn submit(&self, ctx: &ScanContext, job: ScanJob) -> ScanJob;

    /// Queries remote progress. Engines without server-side progress
    /// introspection return the job unchanged rather than erroring.
    async fn poll_status(&self, ctx: &ScanContext, job: ScanJob) -> ScanJob;

    /// Fetches raw report artifacts into a fresh version-stamped directory.
    async fn download(&self, ctx: &ScanContext, job: ScanJob) -> ScanJob;

    /// Runs reconciliation over the downloaded artifacts, stores the report
    /// and marks the job finished.
    async fn parse(&self, ctx: &ScanContext, job: ScanJob) -> ScanJob;

    /// Best-effort remote cleanup before a rescan discards the job's
    /// submission token. Engines without a cancel surface do nothing.
    async fn cancel(&self, _job: &ScanJob) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_dir_is_version_stamped_and_invertible() {
        let ctx = ScanContext {
            assignment_id: 42,
            language: Language::Java,
            submissions_dir: PathBuf::from("/tmp/subs"),
            base_files_dir: None,
            report_root: PathBuf::from("/srv/reports"),
        };
        let dir = ctx.report_dir(EngineName::Moss, 3);
        assert_eq!(dir, PathBuf::from("/srv/reports/42/moss/v3"));
        assert_eq!(version_from_report_dir(&dir.to_string_lossy()), Some(3));
        assert_eq!(version_from_report_dir("/srv/reports/42/moss"), None);
    }
}
