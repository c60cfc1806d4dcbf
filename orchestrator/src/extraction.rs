//! Builds the normalized extraction tree the engines consume: one directory
//! per student containing only source files of the scan's language.
//!
//! The tree is rebuilt from scratch on every tick; a tick that finds nothing
//! worth scanning leaves no half-built tree behind.

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use engines::Language;

use crate::scan::AssignmentScan;

/// File types that must never reach an engine. Finding one means the
/// submission tree was not unpacked properly and scanning would be garbage.
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "tgz", "rar", "7z"];

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Nothing to compare yet; not an error worth surfacing on jobs.
    #[error("fewer than two submissions with source files")]
    InsufficientSubmissions,

    /// The assignment's submission tree does not exist yet.
    #[error("missing submissions directory {0}")]
    MissingContext(String),

    /// An archive or similar blob inside a submission; scanning would be
    /// meaningless, so every job for the assignment is failed.
    #[error("unsupported file type in submission: {0}")]
    InvalidFileType(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait SubmissionExtractor: Send + Sync {
    /// Produces the normalized tree `<dir>/<studentId>/<files>` for one scan
    /// and returns its root.
    async fn extract(&self, scan: &AssignmentScan) -> Result<PathBuf, ExtractionError>;
}

/// Filesystem extractor: copies language-matched files from the raw
/// submission tree into a scratch tree under `temp_root`.
pub struct FsExtractor {
    temp_root: PathBuf,
}

impl FsExtractor {
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }
}

#[async_trait]
impl SubmissionExtractor for FsExtractor {
    async fn extract(&self, scan: &AssignmentScan) -> Result<PathBuf, ExtractionError> {
        let source = &scan.submissions_root;
        if !source.is_dir() {
            return Err(ExtractionError::MissingContext(
                source.display().to_string(),
            ));
        }

        let dest = self.temp_root.join(scan.assignment_id.to_string());
        if dest.exists() {
            fs::remove_dir_all(&dest)?;
        }
        fs::create_dir_all(&dest)?;

        let sources = source_matcher(scan.language);
        let archives = archive_matcher();

        let mut student_dirs: Vec<String> = Vec::new();
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                student_dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        student_dirs.sort();

        let mut anonymized = BTreeMap::new();
        let mut copied_students = 0usize;
        for (idx, student) in student_dirs.iter().enumerate() {
            let owner = if scan.anonymize {
                let id = (idx + 1).to_string();
                anonymized.insert(student.clone(), id.clone());
                id
            } else if student.chars().all(|c| c.is_ascii_digit()) {
                student.clone()
            } else {
                log::warn!(
                    "assignment {}: skipping non-numeric submission directory '{student}'",
                    scan.assignment_id
                );
                continue;
            };

            let copied =
                copy_student_files(&source.join(student), &dest.join(&owner), &sources, &archives)?;
            if copied > 0 {
                copied_students += 1;
            }
        }

        if scan.anonymize {
            let mapping = serde_json::to_string_pretty(&anonymized)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            fs::write(dest.join("anonymization.json"), mapping)?;
        }

        if copied_students < 2 {
            fs::remove_dir_all(&dest)?;
            return Err(ExtractionError::InsufficientSubmissions);
        }

        log::debug!(
            "assignment {}: extracted {copied_students} submissions into {}",
            scan.assignment_id,
            dest.display()
        );
        Ok(dest)
    }
}

/// Copies matching files under `from` into `to`, preserving relative paths.
/// Returns the number of files copied.
fn copy_student_files(
    from: &Path,
    to: &Path,
    sources: &GlobSet,
    archives: &GlobSet,
) -> Result<usize, ExtractionError> {
    let mut copied = 0usize;
    for entry in WalkDir::new(from).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        if archives.is_match(rel) {
            return Err(ExtractionError::InvalidFileType(
                entry.path().display().to_string(),
            ));
        }
        if !sources.is_match(rel) {
            continue;
        }
        let target = to.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &target)?;
        copied += 1;
    }
    Ok(copied)
}

fn source_matcher(language: Language) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for ext in language.extensions() {
        // Compile-time-known patterns; building them cannot fail.
        builder.add(Glob::new(&format!("**/*.{ext}")).unwrap());
    }
    builder.build().unwrap()
}

fn archive_matcher() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for ext in ARCHIVE_EXTENSIONS {
        builder.add(Glob::new(&format!("**/*.{ext}")).unwrap());
    }
    builder.build().unwrap()
}
