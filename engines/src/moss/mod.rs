//! The socket engine: one synchronous protocol session uploads everything and
//! answers with a report URL, so a successful submit lands the job directly in
//! `done`. Results are mirrored locally before parsing so reconciliation never
//! depends on the remote copy surviving.

pub mod client;
pub mod mirror;
pub mod proxy;

use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use report_parser::{ReportInput, parse_moss_report, student_file};
use store::{EngineName, Report, ReportStore, ScanJob, ScanStatus};

use crate::adapter::{EngineAdapter, ScanContext, version_from_report_dir};
use crate::error::EngineError;
use crate::languages::{Language, MOSS_LANGUAGES};

pub use client::{MossUpload, SessionOptions};
pub use proxy::ProxyConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct MossConfig {
    /// Registered account id. Empty means the engine is not configured.
    pub user_id: String,
    pub server: String,
    pub port: u16,
    pub proxy: Option<ProxyConfig>,
    pub max_matches: u32,
    pub show_limit: u32,
    pub experimental: bool,
}

impl Default for MossConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            server: "moss.stanford.edu".into(),
            port: 7690,
            proxy: None,
            max_matches: 10,
            show_limit: 250,
            experimental: false,
        }
    }
}

pub struct MossAdapter {
    config: MossConfig,
    reports: Arc<dyn ReportStore>,
}

impl MossAdapter {
    pub fn new(config: MossConfig, reports: Arc<dyn ReportStore>) -> Self {
        Self { config, reports }
    }

    async fn try_submit(&self, ctx: &ScanContext, job: &mut ScanJob) -> Result<(), EngineError> {
        if self.config.user_id.trim().is_empty() {
            return Err(EngineError::MissingCredentials);
        }
        if !MOSS_LANGUAGES.contains(&ctx.language) {
            return Err(EngineError::UnsupportedLanguage(
                format!("{:?}", ctx.language).to_lowercase(),
            ));
        }

        job.advance_to(ScanStatus::Uploading, "uploading submissions");
        let uploads = gather_uploads(ctx)?;
        log::info!(
            "assignment {}: submitting {} files to {}:{}",
            ctx.assignment_id,
            uploads.len(),
            self.config.server,
            self.config.port
        );

        let stream = proxy::connect(
            &self.config.server,
            self.config.port,
            self.config.proxy.as_ref(),
        )
        .await?;
        let opts = SessionOptions {
            user_id: self.config.user_id.clone(),
            language: ctx.language.to_moss().to_string(),
            max_matches: self.config.max_matches,
            show_limit: self.config.show_limit,
            experimental: self.config.experimental,
            comment: format!("assignment {}", ctx.assignment_id),
        };
        let url = client::run_session(stream, &opts, &uploads).await?;

        job.submission_token = Some(url.clone());
        job.set_progress(60);
        // The session is synchronous: by the time the URL arrives the remote
        // comparison has already run, so scanning is skipped.
        job.advance_to(ScanStatus::Done, format!("report ready at {url}"));
        Ok(())
    }

    async fn try_download(&self, ctx: &ScanContext, job: &mut ScanJob) -> Result<(), EngineError> {
        let url = job
            .submission_token
            .clone()
            .ok_or_else(|| EngineError::Remote("no report url recorded for download".into()))?;

        let version = self
            .reports
            .next_version(ctx.assignment_id, EngineName::Moss)
            .await?;
        let dest = ctx.report_dir(EngineName::Moss, version);
        mirror::mirror_report(&url, &dest).await?;

        job.report_dir = Some(dest.to_string_lossy().into_owned());
        job.set_progress(90);
        job.advance_to(ScanStatus::Downloading, "report mirrored locally");
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
        let parsed = parse_moss_report(&input)?;
        log::info!(
            "assignment {}: moss v{version} parsed, {} pairs, {} annotated files",
            ctx.assignment_id,
            parsed.pairs.len(),
            parsed.annotated_files.len()
        );

        let report = Report::new(
            ctx.assignment_id,
            EngineName::Moss,
            version,
            report_dir,
            job.submission_token.clone().unwrap_or_default(),
        );
        self.reports.insert(report, parsed.pairs).await?;
        job.advance_to(ScanStatus::Finished, "scan finished");
        Ok(())
    }
}

/// Builds the upload set: optional instructor base files (id 0) followed by
/// one reconstructed file per student, named `<studentId>/submission` so
/// report labels carry the student id.
fn gather_uploads(ctx: &ScanContext) -> Result<Vec<MossUpload>, EngineError> {
    let mut uploads = Vec::new();

    if let Some(base_dir) = &ctx.base_files_dir {
        if base_dir.is_dir() {
            let text = student_file::reconstruct(base_dir)?;
            if !text.is_empty() {
                uploads.push(MossUpload {
                    display_name: "base/submission".into(),
                    content: text.into_bytes(),
                    base: true,
                });
            }
        }
    }

    for student in student_dirs(&ctx.submissions_dir)? {
        let text = student_file::reconstruct(&ctx.submissions_dir.join(&student))?;
        if text.is_empty() {
            log::warn!("assignment {}: student {student} has no source files", ctx.assignment_id);
            continue;
        }
        uploads.push(MossUpload {
            display_name: format!("{student}/submission"),
            content: text.into_bytes(),
            base: false,
        });
    }
    Ok(uploads)
}

/// Student directory names under the normalized extraction tree, sorted for
/// deterministic upload order.
pub(crate) fn student_dirs(submissions_dir: &Path) -> Result<Vec<String>, EngineError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(submissions_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    out.sort();
    Ok(out)
}

#[async_trait]
impl EngineAdapter for MossAdapter {
    fn name(&self) -> EngineName {
        EngineName::Moss
    }

    fn supported_languages(&self) -> &'static [Language] {
        MOSS_LANGUAGES
    }

    fn display_link(&self, job: &ScanJob) -> Option<String> {
        job.submission_token.clone()
    }

    async fn submit(&self, ctx: &ScanContext, mut job: ScanJob) -> ScanJob {
        if let Err(e) = self.try_submit(ctx, &mut job).await {
            log::error!("assignment {}: moss submit failed: {e}", ctx.assignment_id);
            e.fail_job(&mut job);
        }
        job
    }

    // The socket protocol has no progress introspection; submit already landed
    // the job in `done`, so polling is the identity.
    async fn poll_status(&self, _ctx: &ScanContext, job: ScanJob) -> ScanJob {
        job
    }

    async fn download(&self, ctx: &ScanContext, mut job: ScanJob) -> ScanJob {
        if let Err(e) = self.try_download(ctx, &mut job).await {
            log::error!("assignment {}: moss download failed: {e}", ctx.assignment_id);
            e.fail_job(&mut job);
        }
        job
    }

    async fn parse(&self, ctx: &ScanContext, mut job: ScanJob) -> ScanJob {
        if let Err(e) = self.try_parse(ctx, &mut job).await {
            log::error!("assignment {}: moss parse failed: {e}", ctx.assignment_id);
            e.fail_job(&mut job);
        }
        job
    }
}
