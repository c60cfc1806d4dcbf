pub mod report;
pub mod scan_job;
pub mod similarity_pair;
