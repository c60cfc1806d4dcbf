//! Scan scheduling over the engine adapters: extraction of submission trees,
//! per-tick lifecycle advancement, stale-job recovery and rescan handling.

pub mod extraction;
pub mod scan;

pub use extraction::{ExtractionError, FsExtractor, SubmissionExtractor};
pub use scan::{AssignmentScan, EngineSet, MemoryScanSchedule, ScanOrchestrator, ScanSchedule};
