//! The `CacheLayer` trait shared by L1 and L2 (C3, spec §4.3).

use async_trait::async_trait;
use isr_core::{CacheEntry, CacheStatus, Result};

/// A single cache tier. Both L1 (near, TTL-evicting) and L2 (far,
/// persistent) implement this identical contract; two-tier composition
/// (C4) is what gives them different roles.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get(&self, key: &str) -> Result<(Option<CacheEntry>, CacheStatus)>;
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Classifies a stored entry as HIT or STALE against the current time,
/// given the entry was found at all. Shared by every `CacheLayer`
/// implementation so staleness semantics stay identical across tiers.
pub fn classify(metadata: &isr_core::CacheEntryMetadata, now_millis: i64) -> CacheStatus {
    if metadata.is_stale_at(now_millis) {
        CacheStatus::Stale
    } else {
        CacheStatus::Hit
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
