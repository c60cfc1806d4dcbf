//! Versioned scan report metadata, one row per completed scan. Immutable once
//! created except for cascade deletion with the assignment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::scan_job::EngineName;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub assignment_id: i64,
    pub engine: EngineName,
    /// Monotonically increasing per (assignment, engine), starting at 1.
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    /// Directory holding the raw engine artifacts plus annotated student files.
    pub report_dir: String,
    pub description: String,
}

impl Report {
    pub fn new(
        assignment_id: i64,
        engine: EngineName,
        version: u32,
        report_dir: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            assignment_id,
            engine,
            version,
            generated_at: Utc::now(),
            report_dir: report_dir.into(),
            description: description.into(),
        }
    }

    pub fn key(&self) -> (i64, EngineName, u32) {
        (self.assignment_id, self.engine, self.version)
    }
}
