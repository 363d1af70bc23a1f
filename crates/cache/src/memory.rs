//! In-process cache implementation over `RwLock<HashMap>` with
//! deadline-based expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Cache, CacheError, CacheKey, CacheValue};

struct Entry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// The in-process TTL cache. Designed to be shared via `Arc` and used
/// concurrently by pollers, supervisors and the reconciliation loop.
///
/// Expiry is lazy: reads treat expired entries as absent and writes
/// overwrite them in place. The key population is small and bounded
/// (one entry per live record plus the listing and liveness entries),
/// so there is no background purge.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheValue>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: CacheKey,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key, entry);
        Ok(())
    }
}
