//! In-memory [`ResultStore`] used by tests and local development.
//!
//! Mirrors the Postgres implementation's semantics exactly: sticky
//! terminal statuses, append-only stdout, blobs-before-record ordering
//! on DONE, soft-delete, newest-first filtered listings. Query counters
//! let tests assert how often the cache actually shielded the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use reportd_core::constants::{pdf_filename, resource_filename};
use reportd_core::{ErrorResult, JobId, JobResult, JobStatus, PendingResult, ResultKey};

use crate::{JobStub, RecordFilter, ResultStore, StatusPatch, StoreError};

struct StoredRecord {
    result: JobResult,
    deleted: bool,
}

#[derive(Default)]
pub struct MemoryResultStore {
    records: RwLock<HashMap<JobId, StoredRecord>>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    get_queries: AtomicUsize,
    key_queries: AtomicUsize,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of point lookups served so far.
    pub fn get_query_count(&self) -> usize {
        self.get_queries.load(Ordering::Relaxed)
    }

    /// Number of key-listing queries served so far.
    pub fn key_query_count(&self) -> usize {
        self.key_queries.load(Ordering::Relaxed)
    }

    fn matches(filter: &RecordFilter, result: &JobResult) -> bool {
        if let Some(statuses) = &filter.statuses {
            if !statuses.contains(&result.status()) {
                return false;
            }
        }
        if let Some(report_name) = &filter.report_name {
            if result.report_name() != report_name {
                return false;
            }
        }
        if let Some(parameters) = &filter.parameters {
            let actual = result.parameters();
            if !parameters.iter().all(|(k, v)| actual.get(k) == Some(v)) {
                return false;
            }
        }
        if let Some(since) = filter.since {
            if result.update_time() <= since {
                return false;
            }
        }
        true
    }

    /// Newest-first snapshot of all live records matching `filter`.
    async fn snapshot(&self, filter: &RecordFilter) -> Vec<JobResult> {
        let records = self.records.read().await;
        let mut matched: Vec<JobResult> = records
            .values()
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.result.clone())
            .filter(|result| Self::matches(filter, result))
            .collect();
        matched.sort_by(|a, b| b.update_time().cmp(&a.update_time()));
        if let Some(limit) = filter.limit {
            matched.truncate(limit.max(0) as usize);
        }
        matched
    }

    async fn hydrate(&self, result: &mut JobResult) {
        let JobResult::Complete(complete) = result else {
            return;
        };
        let blobs = self.blobs.read().await;
        for (name, bytes) in complete.html_resources.iter_mut() {
            let filename = resource_filename(complete.job_id, name);
            if let Some(content) = blobs.get(&filename) {
                *bytes = content.clone();
            } else {
                tracing::warn!(job_id = %complete.job_id, filename, "Referenced blob missing");
            }
        }
        if complete.generate_pdf {
            complete.pdf = blobs.get(&pdf_filename(complete.job_id)).cloned();
        }
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save_stub(&self, stub: JobStub) -> Result<(), StoreError> {
        let result = JobResult::Pending(PendingResult {
            job_id: stub.job_id,
            report_name: stub.report_name,
            report_title: stub.report_title,
            status: JobStatus::Submitted,
            parameters: stub.parameters,
            mailto: stub.mailto,
            generate_pdf: stub.generate_pdf,
            start_time: stub.start_time,
            update_time: Utc::now(),
            stdout: Vec::new(),
        });
        self.records.write().await.insert(
            result.job_id(),
            StoredRecord {
                result,
                deleted: false,
            },
        );
        Ok(())
    }

    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        patch: StatusPatch,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let Some(stored) = records.get_mut(&job_id) else {
            tracing::warn!(
                job_id = %job_id,
                status = %status,
                "Couldn't update status: job is not in the database"
            );
            return Ok(());
        };

        if status == JobStatus::Deleted {
            stored.deleted = true;
            return Ok(());
        }
        if stored.result.status().is_terminal() {
            tracing::warn!(
                job_id = %job_id,
                current = %stored.result.status(),
                requested = %status,
                "Couldn't update status: record is already terminal"
            );
            return Ok(());
        }

        let now = Utc::now();
        stored.result = match (&stored.result, status) {
            (JobResult::Pending(pending), JobStatus::Submitted | JobStatus::Pending) => {
                let mut pending = pending.clone();
                pending.status = status;
                pending.update_time = now;
                JobResult::Pending(pending)
            }
            (
                JobResult::Pending(pending),
                JobStatus::Error | JobStatus::Cancelled | JobStatus::Timeout,
            ) => JobResult::Error(ErrorResult {
                job_id: pending.job_id,
                report_name: pending.report_name.clone(),
                report_title: pending.report_title.clone(),
                status,
                parameters: pending.parameters.clone(),
                mailto: pending.mailto.clone(),
                generate_pdf: pending.generate_pdf,
                start_time: pending.start_time,
                update_time: now,
                stdout: pending.stdout.clone(),
                error_info: patch.error_info.unwrap_or_default(),
            }),
            (current, _) => {
                // DONE carries a payload and must go through save_result.
                tracing::warn!(
                    job_id = %job_id,
                    current = %current.status(),
                    requested = %status,
                    "Unsupported status transition via update_status"
                );
                return Ok(());
            }
        };
        Ok(())
    }

    async fn append_output(&self, job_id: JobId, lines: &[String]) -> Result<(), StoreError> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut records = self.records.write().await;
        if let Some(stored) = records.get_mut(&job_id) {
            let stdout = match &mut stored.result {
                JobResult::Pending(r) => &mut r.stdout,
                JobResult::Error(r) => &mut r.stdout,
                JobResult::Complete(r) => &mut r.stdout,
            };
            stdout.extend(lines.iter().cloned());
            match &mut stored.result {
                JobResult::Pending(r) => r.update_time = Utc::now(),
                JobResult::Error(r) => r.update_time = Utc::now(),
                JobResult::Complete(r) => r.update_time = Utc::now(),
            }
        }
        Ok(())
    }

    async fn save_result(&self, result: &JobResult) -> Result<(), StoreError> {
        // Blobs first, record last.
        let mut stored_result = result.clone();
        if let JobResult::Complete(complete) = &mut stored_result {
            let mut blobs = self.blobs.write().await;
            for (name, bytes) in complete.html_resources.iter_mut() {
                let filename = resource_filename(complete.job_id, name);
                blobs.entry(filename).or_insert_with(|| std::mem::take(bytes));
                bytes.clear();
            }
            if let Some(pdf) = complete.pdf.take() {
                blobs.entry(pdf_filename(complete.job_id)).or_insert(pdf);
            }
        }

        let now = Utc::now();
        let mut records = self.records.write().await;
        // A late terminal write must not resurrect a soft-deleted record.
        if records
            .get(&result.job_id())
            .is_some_and(|stored| stored.deleted)
        {
            tracing::warn!(
                job_id = %result.job_id(),
                status = %result.status(),
                "Dropping terminal write for a deleted record"
            );
            return Ok(());
        }
        let previous_stdout = records
            .get(&result.job_id())
            .map(|stored| match &stored.result {
                JobResult::Pending(r) => r.stdout.clone(),
                JobResult::Error(r) => r.stdout.clone(),
                JobResult::Complete(r) => r.stdout.clone(),
            })
            .unwrap_or_default();

        match &mut stored_result {
            JobResult::Pending(r) => {
                let mut merged = previous_stdout;
                merged.append(&mut r.stdout);
                r.stdout = merged;
                r.update_time = now;
            }
            JobResult::Error(r) => {
                let mut merged = previous_stdout;
                merged.append(&mut r.stdout);
                r.stdout = merged;
                r.update_time = now;
            }
            JobResult::Complete(r) => {
                let mut merged = previous_stdout;
                merged.append(&mut r.stdout);
                r.stdout = merged;
                r.update_time = now;
            }
        }

        tracing::info!(job_id = %stored_result.job_id(), status = %stored_result.status(), "Saved result");
        records.insert(
            stored_result.job_id(),
            StoredRecord {
                result: stored_result,
                deleted: false,
            },
        );
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobResult>, StoreError> {
        self.get_queries.fetch_add(1, Ordering::Relaxed);
        let record = {
            let records = self.records.read().await;
            match records.get(&job_id) {
                Some(stored) if !stored.deleted => Some(stored.result.clone()),
                _ => None,
            }
        };
        let Some(mut result) = record else {
            return Ok(None);
        };
        self.hydrate(&mut result).await;
        Ok(Some(result))
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<JobResult>, StoreError> {
        let mut results = self.snapshot(filter).await;
        if filter.load_payload {
            for result in results.iter_mut() {
                self.hydrate(result).await;
            }
        }
        Ok(results)
    }

    async fn list_keys(&self, filter: &RecordFilter) -> Result<Vec<ResultKey>, StoreError> {
        self.key_queries.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .snapshot(filter)
            .await
            .iter()
            .map(JobResult::key)
            .collect())
    }

    async fn read_blob(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.read().await.get(filename).cloned())
    }

    async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
        self.update_status(job_id, JobStatus::Deleted, StatusPatch::default())
            .await
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let records = self.records.read().await;
        Ok(records.values().filter(|stored| !stored.deleted).count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use reportd_core::{CompleteResult, Parameters};
    use std::collections::BTreeMap;

    fn stub(report_name: &str) -> JobStub {
        JobStub {
            job_id: uuid::Uuid::new_v4(),
            report_name: report_name.into(),
            report_title: report_name.into(),
            parameters: Parameters::new(),
            mailto: None,
            generate_pdf: false,
            start_time: Utc::now(),
        }
    }

    fn complete(job_id: JobId, report_name: &str, generate_pdf: bool) -> CompleteResult {
        let mut html_resources = BTreeMap::new();
        html_resources.insert("output_0.png".to_string(), vec![1u8, 2, 3, 4]);
        CompleteResult {
            job_id,
            report_name: report_name.into(),
            report_title: report_name.into(),
            parameters: Parameters::new(),
            mailto: None,
            generate_pdf,
            start_time: Utc::now(),
            finish_time: Utc::now(),
            update_time: Utc::now(),
            stdout: Vec::new(),
            raw_html: "<html/>".into(),
            html_resources,
            raw_document: "{}".into(),
            pdf: generate_pdf.then(|| vec![9u8, 9, 9]),
        }
    }

    #[tokio::test]
    async fn stub_then_get_returns_submitted_with_start_time() {
        let store = MemoryResultStore::new();
        let stub = stub("demo");
        let job_id = stub.job_id;
        let start_time = stub.start_time;
        store.save_stub(stub).await.unwrap();

        let result = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(result.status(), JobStatus::Submitted);
        assert_eq!(result.start_time(), start_time);
    }

    #[tokio::test]
    async fn done_blobs_round_trip_byte_for_byte() {
        let store = MemoryResultStore::new();
        let stub = stub("demo");
        let job_id = stub.job_id;
        store.save_stub(stub).await.unwrap();

        store
            .save_result(&JobResult::Complete(complete(job_id, "demo", true)))
            .await
            .unwrap();

        let result = store.get(job_id).await.unwrap().unwrap();
        assert_matches!(result, JobResult::Complete(c) => {
            assert_eq!(c.html_resources["output_0.png"], vec![1u8, 2, 3, 4]);
            assert_eq!(c.pdf.as_deref(), Some(&[9u8, 9, 9][..]));
        });
        let blob = store
            .read_blob(&resource_filename(job_id, "output_0.png"))
            .await
            .unwrap();
        assert_eq!(blob.as_deref(), Some(&[1u8, 2, 3, 4][..]));
    }

    #[tokio::test]
    async fn terminal_status_is_sticky() {
        let store = MemoryResultStore::new();
        let stub = stub("demo");
        let job_id = stub.job_id;
        store.save_stub(stub).await.unwrap();
        store
            .update_status(
                job_id,
                JobStatus::Error,
                StatusPatch {
                    error_info: Some("boom".into()),
                },
            )
            .await
            .unwrap();

        // A late timeout write must not resurrect or reshape the record.
        store
            .update_status(
                job_id,
                JobStatus::Timeout,
                StatusPatch {
                    error_info: Some("too slow".into()),
                },
            )
            .await
            .unwrap();
        store
            .update_status(job_id, JobStatus::Pending, StatusPatch::default())
            .await
            .unwrap();

        let result = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(result.status(), JobStatus::Error);
        assert_matches!(result, JobResult::Error(e) => assert_eq!(e.error_info, "boom"));
    }

    #[tokio::test]
    async fn delete_is_allowed_from_terminal_and_hides_record() {
        let store = MemoryResultStore::new();
        let stub = stub("demo");
        let job_id = stub.job_id;
        store.save_stub(stub).await.unwrap();
        store
            .save_result(&JobResult::Complete(complete(job_id, "demo", false)))
            .await
            .unwrap();

        store.delete(job_id).await.unwrap();
        assert!(store.get(job_id).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store
            .list_keys(&RecordFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn terminal_write_does_not_resurrect_a_deleted_record() {
        let store = MemoryResultStore::new();
        let stub = stub("demo");
        let job_id = stub.job_id;
        store.save_stub(stub).await.unwrap();
        store.delete(job_id).await.unwrap();

        // A worker that outlived the deletion finishes and writes DONE.
        store
            .save_result(&JobResult::Complete(complete(job_id, "demo", false)))
            .await
            .unwrap();

        assert!(store.get(job_id).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn append_output_is_preserved_across_terminal_write() {
        let store = MemoryResultStore::new();
        let stub = stub("demo");
        let job_id = stub.job_id;
        store.save_stub(stub).await.unwrap();

        store
            .append_output(job_id, &["line 1".into(), "line 2".into()])
            .await
            .unwrap();
        store
            .save_result(&JobResult::Complete(complete(job_id, "demo", false)))
            .await
            .unwrap();

        let result = store.get(job_id).await.unwrap().unwrap();
        assert_matches!(result, JobResult::Complete(c) => {
            assert_eq!(c.stdout, vec!["line 1".to_string(), "line 2".to_string()]);
        });
    }

    #[tokio::test]
    async fn list_filters_by_status_and_since() {
        let store = MemoryResultStore::new();
        let first = stub("alpha");
        let first_id = first.job_id;
        store.save_stub(first).await.unwrap();
        let watermark = Utc::now();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = stub("beta");
        let second_id = second.job_id;
        store.save_stub(second).await.unwrap();
        store
            .update_status(second_id, JobStatus::Pending, StatusPatch::default())
            .await
            .unwrap();

        let pending_only = store
            .list(&RecordFilter::with_statuses(vec![JobStatus::Pending]))
            .await
            .unwrap();
        assert_eq!(pending_only.len(), 1);
        assert_eq!(pending_only[0].job_id(), second_id);

        let since = RecordFilter {
            since: Some(watermark),
            ..RecordFilter::default()
        };
        let changed = store.list(&since).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].job_id(), second_id);

        let all = store.list_keys(&RecordFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].job_id, second_id);
        assert_eq!(all[1].job_id, first_id);
    }

    #[tokio::test]
    async fn parameter_subset_filter_matches() {
        let store = MemoryResultStore::new();
        let mut with_params = stub("alpha");
        with_params
            .parameters
            .insert("n".into(), serde_json::json!(5));
        with_params
            .parameters
            .insert("region".into(), serde_json::json!("EU"));
        let match_id = with_params.job_id;
        store.save_stub(with_params).await.unwrap();
        store.save_stub(stub("alpha")).await.unwrap();

        let mut wanted = Parameters::new();
        wanted.insert("n".into(), serde_json::json!(5));
        let filter = RecordFilter {
            report_name: Some("alpha".into()),
            parameters: Some(wanted),
            ..RecordFilter::default()
        };
        let keys = store.list_keys(&filter).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].job_id, match_id);
    }

    #[tokio::test]
    async fn get_record_shapes_not_found() {
        let store = MemoryResultStore::new();
        let missing = uuid::Uuid::new_v4();
        let result = store.get_record("demo", missing).await.unwrap();
        assert_eq!(result.status(), JobStatus::Error);
        assert_eq!(result.job_id(), missing);
    }
}
