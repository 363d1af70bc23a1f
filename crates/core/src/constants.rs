//! Orchestration constants and blob naming helpers.

use std::time::Duration;

use crate::JobId;

/// A SUBMITTED job that has not moved to PENDING within this window never
/// started; the reconciler transitions it to TIMEOUT.
pub const SUBMISSION_TIMEOUT_MINS: i64 = 3;

/// A PENDING job that has produced no terminal result within this window
/// is transitioned to TIMEOUT. Report execution is slow but not this slow.
pub const RUNNING_TIMEOUT_MINS: i64 = 60;

/// Sleep between reconciliation iterations.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// TTL of the cached full key listing. Bounds the store query rate under
/// concurrent pollers without meaningfully delaying new results.
pub const KEY_LISTING_TTL: Duration = Duration::from_secs(1);

/// Bounded retry attempts for cache operations.
pub const CACHE_RETRY_ATTEMPTS: u32 = 3;

/// Error message written when shutdown is observed before a worker starts.
pub const CANCEL_MESSAGE: &str =
    "The service shut down while this job was queued. Please resubmit with the same parameters.";

/// Blob key for a job's rendered PDF.
pub fn pdf_filename(job_id: JobId) -> String {
    format!("{job_id}.pdf")
}

/// Blob key for a named HTML resource (figures, stylesheets) of a job.
pub fn resource_filename(job_id: JobId, name: &str) -> String {
    format!("{job_id}/resources/{name}")
}
