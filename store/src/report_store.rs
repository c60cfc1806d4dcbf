//! Append-only versioned report collection per (assignment, engine), plus the
//! similarity pairs belonging to each report version.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::report::Report;
use crate::models::scan_job::EngineName;
use crate::models::similarity_pair::SimilarityPair;

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Next free version for (assignment, engine): previous max + 1, or 1.
    async fn next_version(
        &self,
        assignment_id: i64,
        engine: EngineName,
    ) -> Result<u32, StoreError>;

    /// Inserts a report and all its pairs in one shot. All-or-nothing: a
    /// failed parse must never leave partial pairs behind, so pairs are only
    /// handed over here, together with the finished report row.
    async fn insert(&self, report: Report, pairs: Vec<SimilarityPair>) -> Result<(), StoreError>;

    /// All reports for (assignment, engine), newest version first.
    async fn list(
        &self,
        assignment_id: i64,
        engine: EngineName,
    ) -> Result<Vec<Report>, StoreError>;

    async fn latest(
        &self,
        assignment_id: i64,
        engine: EngineName,
    ) -> Result<Option<Report>, StoreError>;

    async fn pairs(
        &self,
        assignment_id: i64,
        engine: EngineName,
        version: u32,
    ) -> Result<Vec<SimilarityPair>, StoreError>;

    /// Cascade removal when an assignment's plagiarism configuration is deleted.
    async fn delete_for_assignment(&self, assignment_id: i64) -> Result<(), StoreError>;
}

type ReportKey = (i64, EngineName, u32);

#[derive(Default)]
struct ReportState {
    reports: HashMap<ReportKey, Report>,
    pairs: HashMap<ReportKey, Vec<SimilarityPair>>,
}

/// In-memory store used by tests and small deployments.
#[derive(Default)]
pub struct MemoryReportStore {
    inner: RwLock<ReportState>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn next_version(
        &self,
        assignment_id: i64,
        engine: EngineName,
    ) -> Result<u32, StoreError> {
        let guard = self.inner.read().await;
        let max = guard
            .reports
            .keys()
            .filter(|(aid, eng, _)| *aid == assignment_id && *eng == engine)
            .map(|(_, _, v)| *v)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn insert(&self, report: Report, pairs: Vec<SimilarityPair>) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let key = report.key();
        if guard.reports.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "report {}/{}/v{} already exists",
                key.0, key.1, key.2
            )));
        }
        let mut pairs = pairs;
        for p in &mut pairs {
            p.canonicalize();
        }
        guard.reports.insert(key, report);
        guard.pairs.insert(key, pairs);
        Ok(())
    }

    async fn list(
        &self,
        assignment_id: i64,
        engine: EngineName,
    ) -> Result<Vec<Report>, StoreError> {
        let guard = self.inner.read().await;
        let mut out: Vec<Report> = guard
            .reports
            .values()
            .filter(|r| r.assignment_id == assignment_id && r.engine == engine)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(out)
    }

    async fn latest(
        &self,
        assignment_id: i64,
        engine: EngineName,
    ) -> Result<Option<Report>, StoreError> {
        Ok(self.list(assignment_id, engine).await?.into_iter().next())
    }

    async fn pairs(
        &self,
        assignment_id: i64,
        engine: EngineName,
        version: u32,
    ) -> Result<Vec<SimilarityPair>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .pairs
            .get(&(assignment_id, engine, version))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_for_assignment(&self, assignment_id: i64) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.reports.retain(|(aid, _, _), _| *aid != assignment_id);
        guard.pairs.retain(|(aid, _, _), _| *aid != assignment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(v: u32) -> Report {
        Report::new(5, EngineName::Jplag, v, format!("/tmp/r/v{v}"), "scan")
    }

    #[tokio::test]
    async fn versions_are_monotonic_from_one() {
        let store = MemoryReportStore::new();
        assert_eq!(store.next_version(5, EngineName::Jplag).await.unwrap(), 1);

        store.insert(report(1), vec![]).await.unwrap();
        store.insert(report(2), vec![]).await.unwrap();
        assert_eq!(store.next_version(5, EngineName::Jplag).await.unwrap(), 3);

        // Other engine/assignment streams are independent.
        assert_eq!(store.next_version(5, EngineName::Moss).await.unwrap(), 1);
        assert_eq!(store.next_version(6, EngineName::Jplag).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_version_is_a_conflict() {
        let store = MemoryReportStore::new();
        store.insert(report(1), vec![]).await.unwrap();
        let err = store.insert(report(1), vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn insert_canonicalizes_pairs() {
        use crate::models::similarity_pair::Mark;

        let store = MemoryReportStore::new();
        let pair = SimilarityPair {
            assignment_id: 5,
            engine: EngineName::Jplag,
            report_version: 1,
            student1_id: 2,
            student2_id: 8,
            additional_code_file_name: None,
            similarity1: 40.0,
            similarity2: 70.0,
            comparison_ref: "match0".into(),
            mark: Mark::Unset,
        };
        store.insert(report(1), vec![pair]).await.unwrap();

        let stored = store.pairs(5, EngineName::Jplag, 1).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!((stored[0].student1_id, stored[0].student2_id), (8, 2));
        assert_eq!((stored[0].similarity1, stored[0].similarity2), (70.0, 40.0));
    }

    #[tokio::test]
    async fn cascade_delete_removes_reports_and_pairs() {
        let store = MemoryReportStore::new();
        store.insert(report(1), vec![]).await.unwrap();
        store.delete_for_assignment(5).await.unwrap();
        assert!(store.latest(5, EngineName::Jplag).await.unwrap().is_none());
        assert_eq!(store.next_version(5, EngineName::Jplag).await.unwrap(), 1);
    }
}
