//! Ephemeral TTL cache shielding the result store from poll traffic.
//!
//! The cache is advisory only, never authoritative. Staleness is
//! bounded by entry TTLs and by the reconciliation loop's refresh
//! cadence. Cache operations are retried a bounded number of times
//! against transient unavailability via [`get_with_retry`] and
//! [`set_with_retry`].

use std::time::Duration;

use async_trait::async_trait;

use reportd_core::constants::CACHE_RETRY_ATTEMPTS;
use reportd_core::{JobId, JobResult, ResultKey};

pub mod memory;

pub use memory::MemoryCache;

/// Keys of the three entry families the orchestrator caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Snapshot of one job's last known record.
    Record {
        report_name: String,
        job_id: JobId,
    },
    /// The full key listing for a given page size.
    Keys { limit: i64 },
    /// Distinguished liveness flag, cleared atomically at shutdown.
    Alive,
}

impl CacheKey {
    pub fn record(report_name: &str, job_id: JobId) -> Self {
        Self::Record {
            report_name: report_name.to_string(),
            job_id,
        }
    }
}

/// Values stored in the cache.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Record(Box<JobResult>),
    Keys(Vec<ResultKey>),
    Flag(bool),
    /// A half-applied write observed under a racing reader. The status
    /// query retries once on seeing this, then surfaces a distinct
    /// transient-inconsistency error.
    Placeholder(String),
}

/// Transient cache failure.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Ephemeral key-value store with per-entry TTLs.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>, CacheError>;

    /// Store `value` under `key`. `None` TTL means the entry does not
    /// expire on its own (it can still be overwritten).
    async fn set(
        &self,
        key: CacheKey,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;
}

/// [`Cache::get`] with a bounded retry against transient unavailability.
pub async fn get_with_retry(
    cache: &dyn Cache,
    key: &CacheKey,
) -> Result<Option<CacheValue>, CacheError> {
    let mut last_error = None;
    for attempt in 1..=CACHE_RETRY_ATTEMPTS {
        match cache.get(key).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Cache get failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| CacheError::Unavailable("retries exhausted".into())))
}

/// [`Cache::set`] with a bounded retry against transient unavailability.
pub async fn set_with_retry(
    cache: &dyn Cache,
    key: CacheKey,
    value: CacheValue,
    ttl: Option<Duration>,
) -> Result<(), CacheError> {
    let mut last_error = None;
    for attempt in 1..=CACHE_RETRY_ATTEMPTS {
        match cache.set(key.clone(), value.clone(), ttl).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Cache set failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| CacheError::Unavailable("retries exhausted".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then behaves like a cache that
    /// always misses. Exercises the bounded retry helpers.
    struct FlakyCache {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyCache {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Cache for FlakyCache {
        async fn get(&self, _key: &CacheKey) -> Result<Option<CacheValue>, CacheError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(CacheError::Unavailable("flaky".into()))
            } else {
                Ok(None)
            }
        }

        async fn set(
            &self,
            _key: CacheKey,
            _value: CacheValue,
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(CacheError::Unavailable("flaky".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn get_retries_through_transient_failures() {
        let cache = FlakyCache::failing(2);
        let value = get_with_retry(&cache, &CacheKey::Alive).await.unwrap();
        assert!(value.is_none());
        assert_eq!(cache.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn get_gives_up_after_bounded_attempts() {
        let cache = FlakyCache::failing(10);
        let err = get_with_retry(&cache, &CacheKey::Alive).await.unwrap_err();
        assert!(matches!(err, CacheError::Unavailable(_)));
        assert_eq!(
            cache.calls.load(Ordering::SeqCst),
            CACHE_RETRY_ATTEMPTS
        );
    }

    #[tokio::test]
    async fn set_retries_through_transient_failures() {
        let cache = FlakyCache::failing(1);
        set_with_retry(&cache, CacheKey::Alive, CacheValue::Flag(true), None)
            .await
            .unwrap();
        assert_eq!(cache.calls.load(Ordering::SeqCst), 2);
    }
}
