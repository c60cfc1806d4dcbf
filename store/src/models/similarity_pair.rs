//! The similarity relationship between two submissions within one report.
//!
//! A pair is unordered: it is stored once under the canonical ordering and
//! every consumer must canonicalize before lookup. When one side is external
//! seed code rather than a real student, the numeric id is zero-filled and the
//! display name is kept out-of-band in `additional_code_file_name`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::scan_job::EngineName;

/// Sentinel id for "not a real student" sides.
pub const EXTERNAL_CODE_ID: i64 = 0;

/// Instructor-set review mark, independent of engine output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    Suspicious,
    Normal,
    #[default]
    Unset,
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mark::Suspicious => "suspicious",
            Mark::Normal => "normal",
            Mark::Unset => "unset",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Mark {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "suspicious" => Ok(Mark::Suspicious),
            "normal" => Ok(Mark::Normal),
            "unset" => Ok(Mark::Unset),
            other => Err(format!("invalid Mark: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub assignment_id: i64,
    pub engine: EngineName,
    pub report_version: u32,
    pub student1_id: i64,
    pub student2_id: i64,
    /// Display name for the zero-filled side, when one side is external code.
    pub additional_code_file_name: Option<String>,
    /// Percentage of student1's file covered by the match.
    pub similarity1: f32,
    /// Percentage of student2's file covered by the match. Engines report an
    /// asymmetric ratio per side since file lengths differ.
    pub similarity2: f32,
    /// Opaque pointer into engine-native artifacts needed to re-derive spans,
    /// e.g. a relative match page path inside the report directory.
    pub comparison_ref: String,
    pub mark: Mark,
}

impl SimilarityPair {
    /// Canonical unordered key: (max, min). Apply before any lookup.
    pub fn canonical_key(&self) -> (i64, i64) {
        (
            self.student1_id.max(self.student2_id),
            self.student1_id.min(self.student2_id),
        )
    }

    /// Reorders the pair so `student1_id >= student2_id`, swapping the
    /// per-side percentages along with the ids. Idempotent; an external-code
    /// side (id 0) always ends up in slot 2.
    pub fn canonicalize(&mut self) {
        if self.student1_id < self.student2_id {
            std::mem::swap(&mut self.student1_id, &mut self.student2_id);
            std::mem::swap(&mut self.similarity1, &mut self.similarity2);
        }
    }

    /// Rehydrates display identifiers, substituting the out-of-band file name
    /// for the zero-filled external side.
    pub fn display_ids(&self) -> (String, String) {
        let name = |id: i64| -> String {
            if id == EXTERNAL_CODE_ID {
                self.additional_code_file_name
                    .clone()
                    .unwrap_or_else(|| "external code".into())
            } else {
                id.to_string()
            }
        };
        (name(self.student1_id), name(self.student2_id))
    }

    /// True when neither side is a real student. Such pairs are noise and are
    /// discarded during pair extraction.
    pub fn is_external_only(&self) -> bool {
        self.student1_id == EXTERNAL_CODE_ID && self.student2_id == EXTERNAL_CODE_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: i64, b: i64) -> SimilarityPair {
        SimilarityPair {
            assignment_id: 7,
            engine: EngineName::Moss,
            report_version: 1,
            student1_id: a,
            student2_id: b,
            additional_code_file_name: None,
            similarity1: 85.0,
            similarity2: 90.0,
            comparison_ref: "matches/match0.html".into(),
            mark: Mark::Unset,
        }
    }

    #[test]
    fn canonicalize_orders_max_first_and_swaps_percentages() {
        let mut p = pair(3, 9);
        p.canonicalize();
        assert_eq!((p.student1_id, p.student2_id), (9, 3));
        assert_eq!((p.similarity1, p.similarity2), (90.0, 85.0));
        assert_eq!(p.mark, Mark::Unset);
    }

    #[test]
    fn canonicalize_twice_is_a_no_op() {
        let mut p = pair(3, 9);
        p.canonicalize();
        let snapshot = (p.student1_id, p.student2_id, p.similarity1, p.similarity2);
        p.canonicalize();
        assert_eq!(
            snapshot,
            (p.student1_id, p.student2_id, p.similarity1, p.similarity2)
        );
    }

    #[test]
    fn external_side_rehydrates_from_file_name() {
        let mut p = pair(EXTERNAL_CODE_ID, 42);
        p.additional_code_file_name = Some("starter/skeleton.java".into());
        p.canonicalize();
        assert_eq!(p.student1_id, 42);
        assert_eq!(p.student2_id, EXTERNAL_CODE_ID);
        let (a, b) = p.display_ids();
        assert_eq!(a, "42");
        assert_eq!(b, "starter/skeleton.java");
    }

    #[test]
    fn canonical_key_is_order_independent() {
        assert_eq!(pair(3, 9).canonical_key(), pair(9, 3).canonical_key());
    }
}
