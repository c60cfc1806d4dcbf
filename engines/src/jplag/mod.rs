//! The RPC engine: submissions go up as a chunked newline-delimited JSON
//! payload, progress is polled through a numeric phase code, and the finished
//! report is fetched file-by-file from a manifest.

pub mod client;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::{fs as tfs, io::AsyncWriteExt};

use report_parser::{ReportInput, parse_jplag_report, student_file};
use store::{EngineName, Report, ReportStore, ScanJob, ScanStatus};

use crate::adapter::{EngineAdapter, ScanContext, version_from_report_dir};
use crate::error::EngineError;
use crate::languages::{JPLAG_LANGUAGES, Language};
use crate::moss::student_dirs;

pub use client::{JplagClient, RemoteStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct JplagConfig {
    /// Empty means the engine is not configured.
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Upload chunk size in bytes.
    pub chunk_size: usize,
}

impl Default for JplagConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            chunk_size: 256 * 1024,
        }
    }
}

/// Interprets the remote phase code. Each hundred-block is one lifecycle
/// stage; anything outside the known blocks is a remote failure.
pub fn map_state(state: i32) -> ScanStatus {
    match state {
        0..=99 => ScanStatus::Uploading,
        100..=199 => ScanStatus::Scanning,
        200..=299 => ScanStatus::Done,
        _ => ScanStatus::Error,
    }
}

pub struct JplagAdapter {
    config: JplagConfig,
    reports: Arc<dyn ReportStore>,
}

impl JplagAdapter {
    pub fn new(config: JplagConfig, reports: Arc<dyn ReportStore>) -> Self {
        Self { config, reports }
    }

    fn client(&self) -> Result<JplagClient, EngineError> {
        JplagClient::new(
            self.config.base_url.clone(),
            self.config.username.clone(),
            self.config.password.clone(),
        )
    }

    fn token_of(job: &ScanJob) -> Result<String, EngineError> {
        job.submission_token
            .clone()
            .ok_or_else(|| EngineError::Remote("no submission token recorded".into()))
    }

    async fn try_submit(&self, ctx: &ScanContext, job: &mut ScanJob) -> Result<(), EngineError> {
        if self.config.base_url.trim().is_empty() || self.config.username.trim().is_empty() {
            return Err(EngineError::MissingCredentials);
        }
        let language = ctx
            .language
            .to_jplag()
            .ok_or_else(|| EngineError::UnsupportedLanguage(format!("{:?}", ctx.language).to_lowercase()))?;

        job.advance_to(ScanStatus::Uploading, "uploading submissions");
        let payload = build_payload(ctx)?;

        let client = self.client()?;
        let token = client.start_upload(ctx.assignment_id, language).await?;
        log::info!(
            "assignment {}: rpc upload started, token {token}, {} bytes",
            ctx.assignment_id,
            payload.len()
        );

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&[]]
        } else {
            payload.chunks(self.config.chunk_size.max(1)).collect()
        };
        let total = chunks.len();
        for (seq, chunk) in chunks.into_iter().enumerate() {
            let last = seq + 1 == total;
            client
                .continue_upload(&token, seq as u32, chunk.to_vec(), last)
                .await?;
            // Upload accounts for the first half of the progress bar.
            job.set_progress(((seq + 1) * 50 / total) as u8);
        }

        job.submission_token = Some(token);
        job.advance_to(ScanStatus::Scanning, "queued for comparison");
        Ok(())
    }

    async fn try_poll(&self, ctx: &ScanContext, job: &mut ScanJob) -> Result<(), EngineError> {
        let token = Self::token_of(job)?;
        let status = self.client()?.status(&token).await?;
        log::debug!(
            "assignment {}: rpc state {} progress {}",
            ctx.assignment_id,
            status.state,
            status.progress
        );

        match map_state(status.state) {
            ScanStatus::Uploading => job.set_progress(status.progress.min(50)),
            ScanStatus::Scanning => {
                job.set_progress(50 + status.progress / 2);
                job.advance_to(ScanStatus::Scanning, "comparison running");
            }
            ScanStatus::Done => {
                job.set_progress(80);
                job.advance_to(ScanStatus::Done, "comparison finished");
            }
            _ => {
                return Err(EngineError::Remote(
                    status
                        .message
                        .unwrap_or_else(|| format!("engine reported state {}", status.state)),
                ));
            }
        }
        Ok(())
    }

    async fn try_download(&self, ctx: &ScanContext, job: &mut ScanJob) -> Result<(), EngineError> {
        let token = Self::token_of(job)?;
        let client = self.client()?;

        let version = self
            .reports
            .next_version(ctx.assignment_id, EngineName::Jplag)
            .await?;
        let dest = ctx.report_dir(EngineName::Jplag, version);
        tfs::create_dir_all(&dest).await?;

        let manifest = client.manifest(&token).await?;
        log::info!(
            "assignment {}: fetching {} report files into {}",
            ctx.assignment_id,
            manifest.len(),
            dest.display()
        );
        for name in &manifest {
            let rel = sanitize_manifest_path(name)?;
            let content = client.fetch_file(&token, name).await?;
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                tfs::create_dir_all(parent).await?;
            }
            let mut f = tfs::File::create(&path).await?;
            f.write_all(content.as_bytes()).await?;
        }

        job.report_dir = Some(dest.to_string_lossy().into_owned());
        job.set_progress(90);
        job.advance_to(ScanStatus::Downloading, "report downloaded");
        Ok(())
    }

    async fn try_parse(&self, ctx: &ScanContext, job: &mut ScanJob) -> Result<(), EngineError> {
        let report_dir = job
            .report_dir
            .clone()
            .ok_or_else(|| EngineError::Corrupted("no downloaded report to parse".into()))?;
        let version = version_from_report_dir(&report_dir).ok_or_else(|| {
            EngineError::Corrupted(format!("unversioned report directory '{report_dir}'"))
        })?;

        let input = ReportInput {
            assignment_id: ctx.assignment_id,
            version,
            report_dir: report_dir.clone().into(),
            submissions_dir: ctx.submissions_dir.clone(),
        };
        let parsed = parse_jplag_report(&input)?;
        log::info!(
            "assignment {}: jplag v{version} parsed, {} pairs, {} annotated files",
            ctx.assignment_id,
            parsed.pairs.len(),
            parsed.annotated_files.len()
        );

        let report = Report::new(
            ctx.assignment_id,
            EngineName::Jplag,
            version,
            report_dir,
            format!("token {}", Self::token_of(job)?),
        );
        self.reports.insert(report, parsed.pairs).await?;
        job.advance_to(ScanStatus::Finished, "scan finished");
        Ok(())
    }
}

/// Newline-delimited JSON records, one reconstructed file per student. Names
/// carry the student id so report labels resolve back to students.
fn build_payload(ctx: &ScanContext) -> Result<Vec<u8>, EngineError> {
    let mut payload = Vec::new();
    for student in student_dirs(&ctx.submissions_dir)? {
        let text = student_file::reconstruct(&ctx.submissions_dir.join(&student))?;
        if text.is_empty() {
            log::warn!("assignment {}: student {student} has no source files", ctx.assignment_id);
            continue;
        }
        let record = json!({ "name": format!("{student}/submission"), "content": text });
        payload.extend_from_slice(record.to_string().as_bytes());
        payload.push(b'\n');
    }
    Ok(payload)
}

/// Manifest entries come from the remote side; anything that could escape the
/// version directory is treated as corruption.
fn sanitize_manifest_path(name: &str) -> Result<PathBuf, EngineError> {
    let path = Path::new(name);
    if name.is_empty() || path.is_absolute() {
        return Err(EngineError::Corrupted(format!(
            "unsafe manifest path '{name}'"
        )));
    }
    for comp in path.components() {
        match comp {
            Component::Normal(_) => {}
            _ => {
                return Err(EngineError::Corrupted(format!(
                    "unsafe manifest path '{name}'"
                )));
            }
        }
    }
    Ok(path.to_path_buf())
}

#[async_trait]
impl EngineAdapter for JplagAdapter {
    fn name(&self) -> EngineName {
        EngineName::Jplag
    }

    fn supported_languages(&self) -> &'static [Language] {
        JPLAG_LANGUAGES
    }

    /// The RPC engine exposes no stable public result URL; the mirrored local
    /// copy is the thing to show.
    fn display_link(&self, job: &ScanJob) -> Option<String> {
        job.report_dir.clone()
    }

    async fn submit(&self, ctx: &ScanContext, mut job: ScanJob) -> ScanJob {
        if let Err(e) = self.try_submit(ctx, &mut job).await {
            log::error!("assignment {}: jplag submit failed: {e}", ctx.assignment_id);
            e.fail_job(&mut job);
        }
        job
    }

    async fn poll_status(&self, ctx: &ScanContext, mut job: ScanJob) -> ScanJob {
        if let Err(e) = self.try_poll(ctx, &mut job).await {
            log::error!("assignment {}: jplag poll failed: {e}", ctx.assignment_id);
            e.fail_job(&mut job);
        }
        job
    }

    async fn download(&self, ctx: &ScanContext, mut job: ScanJob) -> ScanJob {
        if let Err(e) = self.try_download(ctx, &mut job).await {
            log::error!("assignment {}: jplag download failed: {e}", ctx.assignment_id);
            e.fail_job(&mut job);
        }
        job
    }

    async fn parse(&self, ctx: &ScanContext, mut job: ScanJob) -> ScanJob {
        if let Err(e) = self.try_parse(ctx, &mut job).await {
            log::error!("assignment {}: jplag parse failed: {e}", ctx.assignment_id);
            e.fail_job(&mut job);
        }
        job
    }

    /// Tells the server to drop the submission so a rescan does not leave an
    /// abandoned remote job behind. Failures only warn: the local reset
    /// proceeds either way.
    async fn cancel(&self, job: &ScanJob) {
        let Some(token) = job.submission_token.as_deref() else {
            return;
        };
        let result = match self.client() {
            Ok(client) => client.cancel(token).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            log::warn!(
                "assignment {}: jplag cancel of token {token} failed: {e}",
                job.assignment_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use store::MemoryReportStore;
    use tempfile::tempdir;

    #[test]
    fn phase_codes_map_to_lifecycle_stages() {
        assert_eq!(map_state(0), ScanStatus::Uploading);
        assert_eq!(map_state(99), ScanStatus::Uploading);
        assert_eq!(map_state(100), ScanStatus::Scanning);
        assert_eq!(map_state(199), ScanStatus::Scanning);
        assert_eq!(map_state(200), ScanStatus::Done);
        assert_eq!(map_state(299), ScanStatus::Done);
        assert_eq!(map_state(300), ScanStatus::Error);
        assert_eq!(map_state(-1), ScanStatus::Error);
    }

    #[test]
    fn payload_is_one_json_record_per_student() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("17")).unwrap();
        fs::write(dir.path().join("17/Main.java"), "class A {}\n").unwrap();

        let ctx = ScanContext {
            assignment_id: 7,
            language: Language::Java,
            submissions_dir: dir.path().to_path_buf(),
            base_files_dir: None,
            report_root: PathBuf::from("/tmp/reports"),
        };
        let payload = build_payload(&ctx).unwrap();
        let text = String::from_utf8(payload).unwrap();
        let lines: Vec<&str> = text.trim_end().lines().collect();
        assert_eq!(lines.len(), 1);

        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["name"], "17/submission");
        assert_eq!(record["content"], "===== Main.java =====\nclass A {}\n");
    }

    #[test]
    fn manifest_paths_must_stay_inside_the_report_dir() {
        assert!(sanitize_manifest_path("index.html").is_ok());
        assert!(sanitize_manifest_path("matches/match0-1.html").is_ok());
        assert!(sanitize_manifest_path("../escape.html").is_err());
        assert!(sanitize_manifest_path("/etc/passwd").is_err());
        assert!(sanitize_manifest_path("").is_err());
        assert!(sanitize_manifest_path("a/./b.html").is_err());
    }

    #[tokio::test]
    async fn missing_credentials_fail_the_job_without_io() {
        let adapter = JplagAdapter::new(JplagConfig::default(), Arc::new(MemoryReportStore::new()));
        let ctx = ScanContext {
            assignment_id: 7,
            language: Language::Java,
            submissions_dir: PathBuf::from("/nonexistent"),
            base_files_dir: None,
            report_root: PathBuf::from("/tmp/reports"),
        };
        let job = adapter.submit(&ctx, ScanJob::new(7, EngineName::Jplag)).await;
        assert_eq!(job.status, ScanStatus::Error);
        assert_eq!(job.message, "credentials not provided");
    }

    #[tokio::test]
    async fn unsupported_language_fails_before_any_upload() {
        let config = JplagConfig {
            base_url: "http://jplag.example.org".into(),
            username: "u".into(),
            password: "p".into(),
            ..JplagConfig::default()
        };
        let adapter = JplagAdapter::new(config, Arc::new(MemoryReportStore::new()));
        let ctx = ScanContext {
            assignment_id: 7,
            language: Language::Haskell,
            submissions_dir: PathBuf::from("/nonexistent"),
            base_files_dir: None,
            report_root: PathBuf::from("/tmp/reports"),
        };
        let job = adapter.submit(&ctx, ScanJob::new(7, EngineName::Jplag)).await;
        assert_eq!(job.status, ScanStatus::Error);
        assert!(job.message.contains("not supported"));
    }
}
