//! Similarity reconciliation engine.
//!
//! Turns one engine's raw report directory into the unified model: a set of
//! canonical `SimilarityPair`s plus one annotated reconstructed source file
//! per student. Parsing is all-or-nothing; any malformed artifact aborts the
//! attempt with a corruption diagnostic and commits nothing.

pub mod error;
pub mod jplag_report;
pub mod moss_report;
pub mod pairs;
pub mod spans;
pub mod student_file;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use store::{EngineName, SimilarityPair, EXTERNAL_CODE_ID};

pub use error::ParseError;
pub use pairs::PairContext;

/// Everything the parser needs to locate artifacts and stamp output.
#[derive(Debug, Clone)]
pub struct ReportInput {
    pub assignment_id: i64,
    pub version: u32,
    /// Directory of downloaded engine artifacts; annotated files are written
    /// under `<report_dir>/annotated/`.
    pub report_dir: PathBuf,
    /// Normalized extraction tree `<submissions_dir>/<studentId>/<files>`.
    pub submissions_dir: PathBuf,
}

#[derive(Debug)]
pub struct ParsedReport {
    pub pairs: Vec<SimilarityPair>,
    pub annotated_files: Vec<PathBuf>,
}

/// Parses a MOSS-dialect report directory (mirrored index + match frames).
pub fn parse_moss_report(input: &ReportInput) -> Result<ParsedReport, ParseError> {
    parse_report(input, EngineName::Moss)
}

/// Parses a JPlag-dialect report directory (downloaded index + match frames).
pub fn parse_jplag_report(input: &ReportInput) -> Result<ParsedReport, ParseError> {
    parse_report(input, EngineName::Jplag)
}

fn parse_report(input: &ReportInput, engine: EngineName) -> Result<ParsedReport, ParseError> {
    let index_path = input.report_dir.join("index.html");
    let index_html = fs::read_to_string(&index_path).map_err(|_| {
        ParseError::corrupted(format!("missing report index {}", index_path.display()))
    })?;

    let ctx = PairContext {
        assignment_id: input.assignment_id,
        engine,
        version: input.version,
    };
    let pairs = match engine {
        EngineName::Moss => pairs::extract_moss_pairs(&index_html, &ctx)?,
        EngineName::Jplag => pairs::extract_jplag_pairs(&index_html, &ctx)?,
    };
    log::debug!(
        "report {}/{} v{}: {} pairs extracted",
        input.assignment_id,
        engine,
        input.version,
        pairs.len()
    );

    let mut spans_by_owner: HashMap<String, Vec<spans::RawSpan>> = HashMap::new();
    for pair in &pairs {
        collect_pair_spans(input, engine, pair, &mut spans_by_owner)?;
    }

    let annotated_files =
        student_file::write_annotated(&input.report_dir, &input.submissions_dir, spans_by_owner)?;

    Ok(ParsedReport {
        pairs,
        annotated_files,
    })
}

/// Reads both side frames of one comparison and accumulates each real
/// student's spans. External sides have no reconstruction to annotate and are
/// skipped; the opposite side still gets spans attributed to the external
/// display name.
fn collect_pair_spans(
    input: &ReportInput,
    engine: EngineName,
    pair: &SimilarityPair,
    spans_by_owner: &mut HashMap<String, Vec<spans::RawSpan>>,
) -> Result<(), ParseError> {
    let (display1, display2) = pair.display_ids();
    let sides = [
        (0usize, pair.student1_id, display2),
        (1usize, pair.student2_id, display1),
    ];

    for (side, owner_id, other_display) in sides {
        if owner_id == EXTERNAL_CODE_ID {
            continue;
        }
        let frame_path = frame_path(&input.report_dir, &pair.comparison_ref, side)?;
        let html = fs::read_to_string(&frame_path).map_err(|_| {
            ParseError::corrupted(format!("missing match frame {}", frame_path.display()))
        })?;
        let side_spans = match engine {
            EngineName::Moss => moss_report::extract_spans(&html, &other_display)?,
            EngineName::Jplag => jplag_report::extract_spans(&html, &other_display)?,
        };
        spans_by_owner
            .entry(owner_id.to_string())
            .or_default()
            .extend(side_spans);
    }
    Ok(())
}

/// `matches/match3.html` + side 1 -> `<report_dir>/matches/match3-1.html`.
fn frame_path(report_dir: &Path, comparison_ref: &str, side: usize) -> Result<PathBuf, ParseError> {
    let stem = comparison_ref.strip_suffix(".html").ok_or_else(|| {
        ParseError::corrupted(format!("unexpected comparison ref '{comparison_ref}'"))
    })?;
    Ok(report_dir.join(format!("{stem}-{side}.html")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn seed_submissions(root: &Path) {
        write(&root.join("17/main.c"), "int main() {\n  int x = 1;\n  return x;\n}\n");
        write(&root.join("23/main.c"), "int main() {\n  int x = 1;\n  return 0;\n}\n");
    }

    const MOSS_INDEX: &str = r#"<html><body><table>
        <tr><th>File 1</th><th>File 2</th><th>Lines Matched</th></tr>
        <tr>
          <td><a href="matches/match0.html">17/main.c (61%)</a></td>
          <td><a href="matches/match0.html">23/main.c (64%)</a></td>
          <td>3</td>
        </tr>
        </table></body></html>"#;

    const MOSS_FRAME: &str = "<HTML><BODY>\n<PRE>\n<A NAME=\"0\"></A><FONT color = #FF0000>===== main.c =====\nint main() {</FONT>\n  int x = 1;\n  return x;\n}\n</PRE>\n</BODY></HTML>\n";

    #[test]
    fn moss_report_round_trip_produces_pairs_and_annotations() {
        let dir = tempdir().unwrap();
        let report_dir = dir.path().join("report/v1");
        let submissions = dir.path().join("subs");
        seed_submissions(&submissions);

        write(&report_dir.join("index.html"), MOSS_INDEX);
        write(&report_dir.join("matches/match0-0.html"), MOSS_FRAME);
        write(&report_dir.join("matches/match0-1.html"), MOSS_FRAME);

        let input = ReportInput {
            assignment_id: 3,
            version: 1,
            report_dir: report_dir.clone(),
            submissions_dir: submissions,
        };
        let parsed = parse_moss_report(&input).unwrap();

        assert_eq!(parsed.pairs.len(), 1);
        assert_eq!(
            (parsed.pairs[0].student1_id, parsed.pairs[0].student2_id),
            (17, 23)
        );
        assert_eq!(parsed.annotated_files.len(), 2);
        let annotated = fs::read_to_string(&parsed.annotated_files[0]).unwrap();
        assert!(annotated.contains("{{sim:begin"));
    }

    #[test]
    fn missing_frame_aborts_with_corruption() {
        let dir = tempdir().unwrap();
        let report_dir = dir.path().join("report/v1");
        let submissions = dir.path().join("subs");
        seed_submissions(&submissions);

        write(&report_dir.join("index.html"), MOSS_INDEX);
        // match frames intentionally absent

        let input = ReportInput {
            assignment_id: 3,
            version: 1,
            report_dir,
            submissions_dir: submissions,
        };
        assert!(matches!(
            parse_moss_report(&input),
            Err(ParseError::Corrupted(_))
        ));
    }

    #[test]
    fn missing_index_aborts_with_corruption() {
        let dir = tempdir().unwrap();
        let input = ReportInput {
            assignment_id: 3,
            version: 1,
            report_dir: dir.path().join("empty"),
            submissions_dir: dir.path().join("subs"),
        };
        assert!(matches!(
            parse_moss_report(&input),
            Err(ParseError::Corrupted(_))
        ));
    }
}
