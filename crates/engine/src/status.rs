//! Read-side queries: cache-first status lookups and key listings.

use std::time::Duration;

use reportd_cache::{get_with_retry, set_with_retry, CacheError, CacheKey, CacheValue};
use reportd_core::constants::KEY_LISTING_TTL;
use reportd_core::{JobId, JobResult, JobStatus, Parameters, ResultKey};
use reportd_db::{RecordFilter, StoreError};

use crate::context::RunnerContext;

/// Default page size for key listings.
pub const DEFAULT_KEY_LIMIT: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("transient inconsistency while reading job {0}, retry the request")]
    TransientInconsistency(JobId),
}

/// Cache-first status lookup. Misses fall back to the store and
/// repopulate the cache; unknown or deleted job ids come back as a
/// well-formed ERROR-shaped record rather than an error.
pub async fn get_status(
    ctx: &RunnerContext,
    report_name: &str,
    job_id: JobId,
) -> Result<JobResult, StatusError> {
    let key = CacheKey::record(report_name, job_id);
    let mut saw_placeholder = false;
    loop {
        match get_with_retry(ctx.cache.as_ref(), &key).await? {
            Some(CacheValue::Record(result)) => return Ok(*result),
            Some(CacheValue::Placeholder(detail)) => {
                // A racing writer left a half-applied entry. One
                // transparent retry; a second sighting is surfaced so
                // callers know to come back rather than trust the read.
                if saw_placeholder {
                    tracing::warn!(%job_id, %detail, "Placeholder still present after retry");
                    return Err(StatusError::TransientInconsistency(job_id));
                }
                saw_placeholder = true;
                tracing::debug!(%job_id, %detail, "Placeholder observed, retrying the read");
            }
            _ => {
                let result = ctx.store.get_record(report_name, job_id).await?;
                set_with_retry(
                    ctx.cache.as_ref(),
                    key,
                    CacheValue::Record(Box::new(result.clone())),
                    None,
                )
                .await?;
                return Ok(result);
            }
        }
    }
}

/// The most recent `(report_name, job_id)` keys, served from a short-TTL
/// cache entry so concurrent pollers share one store query per second.
pub async fn list_result_keys(
    ctx: &RunnerContext,
    limit: i64,
) -> Result<Vec<ResultKey>, StatusError> {
    let key = CacheKey::Keys { limit };
    if let Some(CacheValue::Keys(keys)) = get_with_retry(ctx.cache.as_ref(), &key).await? {
        return Ok(keys);
    }
    refresh_result_keys(ctx, limit, KEY_LISTING_TTL).await
}

/// Query the store for the key listing and overwrite the cached copy.
pub(crate) async fn refresh_result_keys(
    ctx: &RunnerContext,
    limit: i64,
    ttl: Duration,
) -> Result<Vec<ResultKey>, StatusError> {
    let filter = RecordFilter {
        limit: Some(limit),
        ..RecordFilter::default()
    };
    let keys = ctx.store.list_keys(&filter).await?;
    set_with_retry(
        ctx.cache.as_ref(),
        CacheKey::Keys { limit },
        CacheValue::Keys(keys.clone()),
        Some(ttl),
    )
    .await?;
    Ok(keys)
}

/// Newest job id for a report, optionally restricted to records whose
/// parameters contain `parameters`.
pub async fn latest_job_id(
    ctx: &RunnerContext,
    report_name: &str,
    parameters: Option<&Parameters>,
) -> Result<Option<JobId>, StatusError> {
    latest_matching(ctx, report_name, parameters, None).await
}

/// Newest DONE job id for a report.
pub async fn latest_successful_job_id(
    ctx: &RunnerContext,
    report_name: &str,
    parameters: Option<&Parameters>,
) -> Result<Option<JobId>, StatusError> {
    latest_matching(ctx, report_name, parameters, Some(vec![JobStatus::Done])).await
}

async fn latest_matching(
    ctx: &RunnerContext,
    report_name: &str,
    parameters: Option<&Parameters>,
    statuses: Option<Vec<JobStatus>>,
) -> Result<Option<JobId>, StatusError> {
    let filter = RecordFilter {
        statuses,
        report_name: Some(report_name.to_string()),
        parameters: parameters.cloned(),
        limit: Some(1),
        ..RecordFilter::default()
    };
    let keys = ctx.store.list_keys(&filter).await?;
    Ok(keys.first().map(|key| key.job_id))
}

/// Soft-delete a record and refresh its cache entry so pollers see the
/// deletion without waiting for the reconciler.
pub async fn delete_result(
    ctx: &RunnerContext,
    report_name: &str,
    job_id: JobId,
) -> Result<(), StatusError> {
    ctx.store.delete(job_id).await?;
    let result = ctx.store.get_record(report_name, job_id).await?;
    set_with_retry(
        ctx.cache.as_ref(),
        CacheKey::record(report_name, job_id),
        CacheValue::Record(Box::new(result)),
        None,
    )
    .await?;
    tracing::info!(%job_id, report_name, "Result deleted");
    Ok(())
}
