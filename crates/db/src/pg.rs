//! PostgreSQL implementation of [`ResultStore`].
//!
//! Blob payloads live in `report_blobs`; on the way out of [`get`] they
//! are streamed back into the record (hydration). Terminal writes for
//! DONE results put every blob in place before the record row, so a
//! reader that sees DONE can always resolve the referenced blobs.
//!
//! [`get`]: ResultStore::get

use async_trait::async_trait;
use sqlx::PgPool;

use reportd_core::constants::{pdf_filename, resource_filename};
use reportd_core::{JobId, JobResult, JobStatus, ResultKey};

use crate::models::ResultRow;
use crate::{JobStub, RecordFilter, ResultStore, StatusPatch, StoreError};

/// Column list for `report_results` queries.
const COLUMNS: &str = "\
    job_id, report_name, report_title, status, parameters, mailto, \
    generate_pdf, start_time, finish_time, update_time, stdout, \
    error_info, raw_html, raw_document, resource_names";

/// Default page size for listings.
const DEFAULT_LIMIT: i64 = 100;

/// Upper bound on any listing page.
const MAX_LIMIT: i64 = 1000;

/// Stored strings of the terminal statuses, for status-transition guards.
fn terminal_stored() -> Vec<String> {
    [
        JobStatus::Done,
        JobStatus::Error,
        JobStatus::Cancelled,
        JobStatus::Timeout,
    ]
    .iter()
    .map(|s| s.as_stored().to_string())
    .collect()
}

/// The production result store.
#[derive(Clone)]
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Write one blob. Blobs are write-once: a duplicate filename is a
    /// no-op, never an overwrite.
    async fn put_blob(&self, filename: &str, content: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO report_blobs (filename, content) VALUES ($1, $2) \
             ON CONFLICT (filename) DO NOTHING",
        )
        .bind(filename)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read blob bytes back into a DONE record.
    async fn hydrate(&self, result: &mut JobResult) -> Result<(), StoreError> {
        let JobResult::Complete(complete) = result else {
            return Ok(());
        };
        for (name, bytes) in complete.html_resources.iter_mut() {
            let filename = resource_filename(complete.job_id, name);
            match self.read_blob(&filename).await? {
                Some(content) => *bytes = content,
                None => {
                    tracing::warn!(job_id = %complete.job_id, filename, "Referenced blob missing");
                }
            }
        }
        if complete.generate_pdf {
            complete.pdf = self.read_blob(&pdf_filename(complete.job_id)).await?;
        }
        Ok(())
    }

    /// Shared WHERE clause builder for [`list`] and [`list_keys`].
    ///
    /// Returns the clause and the limit; binds must be applied in the
    /// same order by [`bind_filter`].
    fn filter_clause(filter: &RecordFilter) -> (String, i64) {
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        // Soft-deleted records never appear in listings.
        conditions.push(format!("status <> ${bind_idx}"));
        bind_idx += 1;

        if filter.statuses.is_some() {
            conditions.push(format!("status = ANY(${bind_idx})"));
            bind_idx += 1;
        }
        if filter.report_name.is_some() {
            conditions.push(format!("report_name = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.parameters.is_some() {
            conditions.push(format!("parameters @> ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.since.is_some() {
            conditions.push(format!("update_time > ${bind_idx}"));
            bind_idx += 1;
        }

        let clause = format!(
            "WHERE {} ORDER BY update_time DESC LIMIT ${bind_idx}",
            conditions.join(" AND ")
        );
        let limit = filter.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        (clause, limit)
    }

    fn bind_filter<'q, O>(
        mut q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments>,
        filter: &'q RecordFilter,
        limit: i64,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, sqlx::postgres::PgArguments> {
        q = q.bind(JobStatus::Deleted.as_stored());
        if let Some(statuses) = &filter.statuses {
            let stored: Vec<String> = statuses.iter().map(|s| s.as_stored().to_string()).collect();
            q = q.bind(stored);
        }
        if let Some(report_name) = &filter.report_name {
            q = q.bind(report_name);
        }
        if let Some(parameters) = &filter.parameters {
            q = q.bind(serde_json::Value::Object(parameters.clone()));
        }
        if let Some(since) = filter.since {
            q = q.bind(since);
        }
        q.bind(limit)
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn save_stub(&self, stub: JobStub) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO report_results \
                 (job_id, report_name, report_title, status, parameters, mailto, \
                  generate_pdf, start_time, update_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW()) \
             ON CONFLICT (job_id) DO UPDATE SET \
                 report_name = EXCLUDED.report_name, \
                 report_title = EXCLUDED.report_title, \
                 status = EXCLUDED.status, \
                 parameters = EXCLUDED.parameters, \
                 mailto = EXCLUDED.mailto, \
                 generate_pdf = EXCLUDED.generate_pdf, \
                 start_time = EXCLUDED.start_time, \
                 update_time = NOW()",
        )
        .bind(stub.job_id)
        .bind(&stub.report_name)
        .bind(&stub.report_title)
        .bind(JobStatus::Submitted.as_stored())
        .bind(serde_json::Value::Object(stub.parameters.clone()))
        .bind(&stub.mailto)
        .bind(stub.generate_pdf)
        .bind(stub.start_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        patch: StatusPatch,
    ) -> Result<(), StoreError> {
        // The guard makes terminal statuses sticky: only an explicit
        // delete may follow them.
        let result = sqlx::query(
            "UPDATE report_results \
             SET status = $2, \
                 error_info = COALESCE($3, error_info), \
                 update_time = NOW() \
             WHERE job_id = $1 \
               AND (status <> ALL($4) OR $2 = $5)",
        )
        .bind(job_id)
        .bind(status.as_stored())
        .bind(&patch.error_info)
        .bind(terminal_stored())
        .bind(JobStatus::Deleted.as_stored())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                job_id = %job_id,
                status = %status,
                "Couldn't update status: job is not in the database or already terminal"
            );
        }
        Ok(())
    }

    async fn append_output(&self, job_id: JobId, lines: &[String]) -> Result<(), StoreError> {
        if lines.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE report_results \
             SET stdout = array_cat(stdout, $2), update_time = NOW() \
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(lines)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_result(&self, result: &JobResult) -> Result<(), StoreError> {
        // Blobs first, record last.
        let (finish_time, raw_html, raw_document, resource_names, error_info) = match result {
            JobResult::Complete(complete) => {
                for (name, bytes) in &complete.html_resources {
                    self.put_blob(&resource_filename(complete.job_id, name), bytes)
                        .await?;
                }
                if let Some(pdf) = &complete.pdf {
                    self.put_blob(&pdf_filename(complete.job_id), pdf).await?;
                }
                let names: Vec<&str> = complete.html_resources.keys().map(String::as_str).collect();
                (
                    Some(complete.finish_time),
                    Some(complete.raw_html.clone()),
                    Some(complete.raw_document.clone()),
                    serde_json::json!(names),
                    None,
                )
            }
            JobResult::Error(error) => (
                None,
                None,
                None,
                serde_json::json!([]),
                Some(error.error_info.clone()),
            ),
            JobResult::Pending(_) => (None, None, None, serde_json::json!([]), None),
        };

        sqlx::query(
            "INSERT INTO report_results \
                 (job_id, report_name, report_title, status, parameters, mailto, \
                  generate_pdf, start_time, finish_time, update_time, stdout, \
                  error_info, raw_html, raw_document, resource_names) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), $10, $11, $12, $13, $14) \
             ON CONFLICT (job_id) DO UPDATE SET \
                 report_name = EXCLUDED.report_name, \
                 report_title = EXCLUDED.report_title, \
                 status = EXCLUDED.status, \
                 parameters = EXCLUDED.parameters, \
                 mailto = EXCLUDED.mailto, \
                 generate_pdf = EXCLUDED.generate_pdf, \
                 start_time = EXCLUDED.start_time, \
                 finish_time = EXCLUDED.finish_time, \
                 update_time = NOW(), \
                 stdout = array_cat(report_results.stdout, EXCLUDED.stdout), \
                 error_info = EXCLUDED.error_info, \
                 raw_html = EXCLUDED.raw_html, \
                 raw_document = EXCLUDED.raw_document, \
                 resource_names = EXCLUDED.resource_names \
             WHERE report_results.status <> $15",
        )
        .bind(result.job_id())
        .bind(result.report_name())
        .bind(result.report_title())
        .bind(result.status().as_stored())
        .bind(serde_json::Value::Object(result.parameters().clone()))
        .bind(result.mailto())
        .bind(result.generate_pdf())
        .bind(result.start_time())
        .bind(finish_time)
        .bind(match result {
            // Monitor-task lines already live in the row; the terminal
            // record only contributes lines it captured itself.
            JobResult::Pending(r) => r.stdout.clone(),
            JobResult::Error(r) => r.stdout.clone(),
            JobResult::Complete(r) => r.stdout.clone(),
        })
        .bind(error_info)
        .bind(raw_html)
        .bind(raw_document)
        .bind(resource_names)
        // A late terminal write must not resurrect a soft-deleted record.
        .bind(JobStatus::Deleted.as_stored())
        .execute(&self.pool)
        .await?;

        tracing::info!(job_id = %result.job_id(), status = %result.status(), "Saved result");
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobResult>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM report_results WHERE job_id = $1");
        let row = sqlx::query_as::<_, ResultRow>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let Some(mut result) = row.into_result()? else {
            return Ok(None);
        };
        self.hydrate(&mut result).await?;
        Ok(Some(result))
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<JobResult>, StoreError> {
        let (clause, limit) = Self::filter_clause(filter);
        let query = format!("SELECT {COLUMNS} FROM report_results {clause}");
        let q = sqlx::query_as::<_, ResultRow>(&query);
        let rows = Self::bind_filter(q, filter, limit)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(mut result) = row.into_result()? {
                if filter.load_payload {
                    self.hydrate(&mut result).await?;
                }
                results.push(result);
            }
        }
        Ok(results)
    }

    async fn list_keys(&self, filter: &RecordFilter) -> Result<Vec<ResultKey>, StoreError> {
        let (clause, limit) = Self::filter_clause(filter);
        let query = format!("SELECT report_name, job_id FROM report_results {clause}");
        let q = sqlx::query_as::<_, (String, JobId)>(&query);
        let keys = Self::bind_filter(q, filter, limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(keys
            .into_iter()
            .map(|(report_name, job_id)| ResultKey {
                report_name,
                job_id,
            })
            .collect())
    }

    async fn read_blob(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let content = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT content FROM report_blobs WHERE filename = $1",
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;
        Ok(content)
    }

    async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
        self.update_status(job_id, JobStatus::Deleted, StatusPatch::default())
            .await
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM report_results WHERE status <> $1",
        )
        .bind(JobStatus::Deleted.as_stored())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
