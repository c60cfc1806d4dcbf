pub mod error;
pub mod models;
pub mod report_store;
pub mod scan_job_store;

pub use error::StoreError;
pub use models::report::Report;
pub use models::scan_job::{EngineName, ScanJob, ScanStatus};
pub use models::similarity_pair::{EXTERNAL_CODE_ID, Mark, SimilarityPair};
pub use report_store::{MemoryReportStore, ReportStore};
pub use scan_job_store::{MemoryScanJobStore, ScanJobStore};
