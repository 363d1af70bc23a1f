//! The reconciliation loop.
//!
//! Workers run in separate processes and write straight to the store, so
//! the cache in this process drifts. The reconciler closes the gap on a
//! fixed interval: it repopulates the key listing and record snapshots,
//! times out jobs stuck in SUBMITTED or PENDING, and refreshes the cache
//! entry of every record that changed since the previous sweep.

use chrono::Utc;

use reportd_cache::{get_with_retry, set_with_retry, CacheKey, CacheValue};
use reportd_core::constants::KEY_LISTING_TTL;
use reportd_core::{JobResult, JobStatus, Timestamp};
use reportd_db::{RecordFilter, StatusPatch};

use crate::context::RunnerContext;
use crate::status::{refresh_result_keys, StatusError, DEFAULT_KEY_LIMIT};

/// Upper bound on records examined per sweep.
const SWEEP_LIMIT: i64 = 1000;

pub struct Reconciler {
    ctx: RunnerContext,
    /// Watermark of the previous sweep; `None` until the first one runs.
    last_query: Option<Timestamp>,
}

impl Reconciler {
    pub fn new(ctx: RunnerContext) -> Self {
        Self {
            ctx,
            last_query: None,
        }
    }

    /// Run sweeps until shutdown. A failed sweep is logged and the next
    /// one proceeds normally.
    pub async fn run(mut self) {
        let cancel = self.ctx.cancel_token();
        let mut ticker = tokio::time::interval(self.ctx.config.reconcile_interval);
        tracing::info!(
            interval_secs = self.ctx.config.reconcile_interval.as_secs(),
            "Reconciliation loop started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.ctx.is_alive().await {
                        break;
                    }
                    if let Err(error) = self.run_once().await {
                        tracing::error!(%error, "Reconciliation sweep failed");
                    }
                }
            }
        }
        tracing::info!("Reconciliation loop stopped");
    }

    /// One sweep. Split out so tests can drive sweeps directly.
    pub async fn run_once(&mut self) -> Result<(), StatusError> {
        self.repopulate_cache().await?;
        self.time_out_stale_jobs().await?;

        // Capture the watermark before querying so a record updated
        // mid-sweep is seen again next time instead of never. Refreshing
        // an already-fresh entry is harmless.
        let next_watermark = Utc::now();
        let refreshed = self.refresh_changed_records().await?;
        tracing::debug!(
            refreshed,
            since = ?self.last_query,
            "Reconciliation sweep complete"
        );
        self.last_query = Some(next_watermark);
        Ok(())
    }

    /// Rebuild the key listing and make sure every listed record has a
    /// cache snapshot, so a restarted process serves reads immediately.
    async fn repopulate_cache(&self) -> Result<(), StatusError> {
        let keys = refresh_result_keys(&self.ctx, DEFAULT_KEY_LIMIT, KEY_LISTING_TTL).await?;
        for key in keys {
            let cache_key = CacheKey::record(&key.report_name, key.job_id);
            if let Some(CacheValue::Record(_)) =
                get_with_retry(self.ctx.cache.as_ref(), &cache_key).await?
            {
                continue;
            }
            let result = self
                .ctx
                .store
                .get_record(&key.report_name, key.job_id)
                .await?;
            set_with_retry(
                self.ctx.cache.as_ref(),
                cache_key,
                CacheValue::Record(Box::new(result)),
                None,
            )
            .await?;
        }
        Ok(())
    }

    /// Transition overdue SUBMITTED and PENDING records to TIMEOUT. The
    /// two states get different allowances: a job that never reached
    /// PENDING died early, a PENDING one may legitimately run for a while.
    async fn time_out_stale_jobs(&self) -> Result<(), StatusError> {
        let filter = RecordFilter {
            statuses: Some(vec![JobStatus::Submitted, JobStatus::Pending]),
            limit: Some(SWEEP_LIMIT),
            ..RecordFilter::default()
        };
        let now = Utc::now();
        for result in self.ctx.store.list(&filter).await? {
            let allowance = match result.status() {
                JobStatus::Submitted => self.ctx.config.submission_timeout,
                JobStatus::Pending => self.ctx.config.running_timeout,
                _ => continue,
            };
            let elapsed = now - result.start_time();
            if elapsed <= allowance {
                continue;
            }
            let minutes = elapsed.num_minutes();
            let seconds = elapsed.num_seconds() - minutes * 60;
            tracing::warn!(
                job_id = %result.job_id(),
                report_name = %result.report_name(),
                status = %result.status(),
                "Timing out a stale job"
            );
            let patch = StatusPatch {
                error_info: Some(format!(
                    "Timed out: no result after {minutes} minutes, {seconds} seconds."
                )),
            };
            self.ctx
                .store
                .update_status(result.job_id(), JobStatus::Timeout, patch)
                .await?;
        }
        Ok(())
    }

    /// Refresh the cache entry of every record whose `update_time` passed
    /// the previous watermark and whose cached status is out of date.
    async fn refresh_changed_records(&self) -> Result<u64, StatusError> {
        let filter = RecordFilter {
            since: self.last_query,
            limit: Some(SWEEP_LIMIT),
            ..RecordFilter::default()
        };
        let mut refreshed = 0;
        for changed in self.ctx.store.list(&filter).await? {
            let cache_key = CacheKey::record(changed.report_name(), changed.job_id());
            let cached_status = match get_with_retry(self.ctx.cache.as_ref(), &cache_key).await? {
                Some(CacheValue::Record(cached)) => Some(cached.status()),
                _ => None,
            };
            if cached_status == Some(changed.status()) {
                continue;
            }
            // Reload with payloads so the snapshot is servable as-is.
            let result: JobResult = self
                .ctx
                .store
                .get_record(changed.report_name(), changed.job_id())
                .await?;
            tracing::info!(
                job_id = %changed.job_id(),
                before = ?cached_status.map(|s| s.to_string()),
                after = %result.status(),
                "Reconciler refreshed a stale cache entry"
            );
            set_with_retry(
                self.ctx.cache.as_ref(),
                cache_key,
                CacheValue::Record(Box::new(result)),
                None,
            )
            .await?;
            refreshed += 1;
        }
        Ok(refreshed)
    }
}
