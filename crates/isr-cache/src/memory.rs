//! L1: a fast, local, TTL-evicting cache layer backed by `moka` (C3, spec
//! §4.3).
//!
//! Per-entry TTL is driven by `moka`'s `Expiry` trait rather than a single
//! cache-wide `time_to_live`, since each entry's eviction deadline depends
//! on its own `revalidate_after` (or a one-year ceiling for `forever`
//! entries).

use crate::layer::{classify, now_millis, CacheLayer};
use async_trait::async_trait;
use isr_core::{CacheEntry, CacheEntryMetadata, CacheStatus, Result};
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};

const FOREVER_TTL: Duration = Duration::from_secs(365 * 24 * 3600);
const DEFAULT_MAX_CAPACITY: u64 = 10_000;

struct EntryExpiry;

impl Expiry<String, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(ttl_for(&value.metadata))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(ttl_for(&value.metadata))
    }
}

/// `max(1 second, ceil((revalidateAfter - now) / 1000))`, or a one-year
/// ceiling for `forever` entries (§4.3).
fn ttl_for(metadata: &CacheEntryMetadata) -> Duration {
    match metadata.revalidate_after {
        None => FOREVER_TTL,
        Some(revalidate_after) => {
            let remaining_ms = revalidate_after - now_millis();
            if remaining_ms <= 0 {
                Duration::from_secs(1)
            } else {
                let secs = (remaining_ms as f64 / 1000.0).ceil() as u64;
                Duration::from_secs(secs.max(1))
            }
        }
    }
}

pub struct MemoryCacheLayer {
    cache: moka::future::Cache<String, Arc<CacheEntry>>,
}

impl MemoryCacheLayer {
    pub fn new(max_capacity: u64) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { cache }
    }
}

impl Default for MemoryCacheLayer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPACITY)
    }
}

#[async_trait]
impl CacheLayer for MemoryCacheLayer {
    async fn get(&self, key: &str) -> Result<(Option<CacheEntry>, CacheStatus)> {
        match self.cache.get(key).await {
            Some(entry) => {
                let status = classify(&entry.metadata, now_millis());
                Ok((Some((*entry).clone()), status))
            }
            None => Ok((None, CacheStatus::Miss)),
        }
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.cache.insert(key.to_string(), Arc::new(entry)).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
