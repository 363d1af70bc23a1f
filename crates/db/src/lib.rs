//! Durable result store for reportd.
//!
//! [`ResultStore`] is the single source of truth for job records and
//! their blob payloads. Two implementations:
//!
//! - [`PgResultStore`]: PostgreSQL via sqlx, the production store.
//! - [`MemoryResultStore`]: in-memory, for tests and local development.
//!
//! All mutation is keyed by `job_id`, so cross-job writes never
//! conflict. Within one job the `stdout` field is the only field two
//! writers touch concurrently and is therefore append-only with an
//! atomic push; every write stamps `update_time`.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;

use reportd_core::{JobId, JobResult, JobStatus, Parameters, ResultKey, Timestamp};

pub mod memory;
pub mod models;
pub mod pg;

pub use memory::MemoryResultStore;
pub use pg::PgResultStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Run pending migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Errors from the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record for job {job_id}: {detail}")]
    Corrupt { job_id: JobId, detail: String },
}

/// Initial record written synchronously at submission time.
#[derive(Debug, Clone)]
pub struct JobStub {
    pub job_id: JobId,
    pub report_name: String,
    pub report_title: String,
    pub parameters: Parameters,
    pub mailto: Option<String>,
    pub generate_pdf: bool,
    pub start_time: Timestamp,
}

/// Extra fields merged into a record by [`ResultStore::update_status`].
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub error_info: Option<String>,
}

/// Filter for listing records and keys. Soft-deleted records are always
/// excluded.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Restrict to these statuses.
    pub statuses: Option<Vec<JobStatus>>,
    /// Restrict to one report name.
    pub report_name: Option<String>,
    /// Parameter subset the record's parameters must contain.
    pub parameters: Option<Parameters>,
    /// Watermark: only records with `update_time` strictly after this.
    pub since: Option<Timestamp>,
    /// Maximum number of records, newest first.
    pub limit: Option<i64>,
    /// When false, blob payloads are not hydrated on the way out.
    pub load_payload: bool,
}

impl RecordFilter {
    pub fn with_statuses(statuses: Vec<JobStatus>) -> Self {
        Self {
            statuses: Some(statuses),
            ..Self::default()
        }
    }
}

/// The durable, queryable record store plus its blob namespace.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert-or-replace the SUBMITTED stub for a new job.
    async fn save_stub(&self, stub: JobStub) -> Result<(), StoreError>;

    /// Move a record to `status`, merging `patch`. Refuses to move a
    /// terminal record to a non-terminal status; an unknown job id is
    /// logged as a warning, not an error.
    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
        patch: StatusPatch,
    ) -> Result<(), StoreError>;

    /// Atomically append output lines. Never a full-record overwrite, so
    /// concurrent monitor-task writes are never lost.
    async fn append_output(&self, job_id: JobId, lines: &[String]) -> Result<(), StoreError>;

    /// Upsert a terminal record. For DONE results every blob payload is
    /// written before the record row, so no reader observes DONE with a
    /// missing blob. A soft-deleted record is never resurrected: the
    /// write is dropped with a warning.
    async fn save_result(&self, result: &JobResult) -> Result<(), StoreError>;

    /// Point lookup, hydrating referenced blobs. `None` for unknown or
    /// soft-deleted job ids.
    async fn get(&self, job_id: JobId) -> Result<Option<JobResult>, StoreError>;

    /// Records matching `filter`, newest first by `update_time`.
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<JobResult>, StoreError>;

    /// `(report_name, job_id)` pairs matching `filter`, newest first.
    async fn list_keys(&self, filter: &RecordFilter) -> Result<Vec<ResultKey>, StoreError>;

    /// Raw blob fetch by filename.
    async fn read_blob(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Soft-delete: the record stays for audit but reads behave as
    /// not-found and listings exclude it.
    async fn delete(&self, job_id: JobId) -> Result<(), StoreError>;

    /// Number of non-deleted records.
    async fn count(&self) -> Result<i64, StoreError>;

    /// Point lookup that never returns null: unknown and deleted job ids
    /// come back as a well-formed ERROR-shaped record.
    async fn get_record(&self, report_name: &str, job_id: JobId) -> Result<JobResult, StoreError> {
        Ok(self
            .get(job_id)
            .await?
            .unwrap_or_else(|| JobResult::not_found(report_name, job_id)))
    }
}
