//! Per-student reconstructed source files.
//!
//! A student's submission is flattened into one text file: every submitted
//! source file concatenated in path order behind a header separator line.
//! The same reconstruction is uploaded to the engines and annotated during
//! reconciliation, so engine-reported positions line up by construction.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::ParseError;
use crate::spans::{self, RawSpan};

pub const FILE_HEADER_PREFIX: &str = "===== ";
pub const FILE_HEADER_SUFFIX: &str = " =====";

/// Concatenates all files under `student_dir` (sorted by relative path) into
/// one reconstructed source text.
pub fn reconstruct(student_dir: &Path) -> Result<String, ParseError> {
    let mut rel_paths: Vec<PathBuf> = WalkDir::new(student_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(student_dir)
                .ok()
                .map(|p| p.to_path_buf())
        })
        .collect();
    rel_paths.sort();

    let mut out = String::new();
    for rel in rel_paths {
        let content = fs::read_to_string(student_dir.join(&rel))?;
        out.push_str(FILE_HEADER_PREFIX);
        out.push_str(&rel.to_string_lossy().replace('\\', "/"));
        out.push_str(FILE_HEADER_SUFFIX);
        out.push('\n');
        out.push_str(&content);
        if !content.ends_with('\n') {
            out.push('\n');
        }
    }
    Ok(out)
}

/// Merges, orders and injects each owner's spans into their reconstruction
/// and writes one annotated file per student under
/// `<report_dir>/annotated/<student>.txt`. Returns the written paths.
///
/// Owners whose raw spans cannot be placed in the reconstruction abort the
/// whole call: a half-annotated report must never be committed.
pub fn write_annotated(
    report_dir: &Path,
    submissions_dir: &Path,
    spans_by_owner: HashMap<String, Vec<RawSpan>>,
) -> Result<Vec<PathBuf>, ParseError> {
    let annotated_dir = report_dir.join("annotated");
    fs::create_dir_all(&annotated_dir)?;

    // Deterministic output order helps tests and diffing.
    let mut owners: Vec<(String, Vec<RawSpan>)> = spans_by_owner.into_iter().collect();
    owners.sort_by(|a, b| a.0.cmp(&b.0));

    let mut written = Vec::with_capacity(owners.len());
    for (owner, raw) in owners {
        let student_dir = submissions_dir.join(&owner);
        if !student_dir.is_dir() {
            return Err(ParseError::corrupted(format!(
                "report references unknown student '{owner}'"
            )));
        }
        let text = reconstruct(&student_dir)?;

        let merged = spans::merge_spans(raw);
        let mut events = spans::to_events(&merged);
        spans::sort_events_descending(&mut events);
        let annotated = spans::inject_markers(&text, &events)?;

        let path = annotated_dir.join(format!("{owner}.txt"));
        fs::write(&path, annotated)?;
        written.push(path);
    }
    Ok(written)
}
