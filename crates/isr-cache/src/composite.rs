//! Two-tier composition of L1 + L2 (C4, spec §4.4): freshness preference,
//! fire-and-forget L1 backfill from L2, stale tie-breaking, and
//! degrade-to-MISS on layer errors.

use crate::layer::CacheLayer;
use async_trait::async_trait;
use isr_core::{CacheEntry, CacheStatus, Result};
use std::sync::Arc;

pub struct TwoTierCache {
    l1: Arc<dyn CacheLayer>,
    l2: Arc<dyn CacheLayer>,
}

impl TwoTierCache {
    pub fn new(l1: Arc<dyn CacheLayer>, l2: Arc<dyn CacheLayer>) -> Self {
        Self { l1, l2 }
    }

    async fn read_layer(layer: &Arc<dyn CacheLayer>, key: &str, layer_name: &str) -> (Option<CacheEntry>, CacheStatus) {
        match layer.get(key).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(key, layer = layer_name, error = %e, "cache layer read failed, degrading to MISS");
                (None, CacheStatus::Miss)
            }
        }
    }
}

#[async_trait]
impl CacheLayer for TwoTierCache {
    async fn get(&self, key: &str) -> Result<(Option<CacheEntry>, CacheStatus)> {
        let (l1_entry, l1_status) = Self::read_layer(&self.l1, key, "l1").await;
        if l1_status == CacheStatus::Hit {
            if let Some(entry) = l1_entry {
                return Ok((Some(entry), CacheStatus::Hit));
            }
        }

        let (l2_entry, l2_status) = Self::read_layer(&self.l2, key, "l2").await;
        if l2_status == CacheStatus::Hit {
            if let Some(entry) = l2_entry {
                let l1 = self.l1.clone();
                let key_owned = key.to_string();
                let backfill_entry = entry.clone();
                tokio::spawn(async move {
                    if let Err(e) = l1.put(&key_owned, backfill_entry).await {
                        tracing::warn!(key = %key_owned, error = %e, "L1 backfill from L2 failed");
                    }
                });
                return Ok((Some(entry), CacheStatus::Hit));
            }
        }

        match (l1_status, l1_entry, l2_status, l2_entry) {
            (CacheStatus::Stale, Some(l1e), CacheStatus::Stale, Some(l2e)) => {
                if l1e.metadata.created_at >= l2e.metadata.created_at {
                    Ok((Some(l1e), CacheStatus::Stale))
                } else {
                    Ok((Some(l2e), CacheStatus::Stale))
                }
            }
            (CacheStatus::Stale, Some(l1e), _, _) => Ok((Some(l1e), CacheStatus::Stale)),
            (_, _, CacheStatus::Stale, Some(l2e)) => Ok((Some(l2e), CacheStatus::Stale)),
            _ => Ok((None, CacheStatus::Miss)),
        }
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let (l1_result, l2_result) =
            tokio::join!(self.l1.put(key, entry.clone()), self.l2.put(key, entry));
        if let Err(e) = l1_result {
            tracing::warn!(key, error = %e, "L1 write failed");
        }
        if let Err(e) = l2_result {
            tracing::warn!(key, error = %e, "L2 write failed");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let (l1_result, l2_result) = tokio::join!(self.l1.delete(key), self.l2.delete(key));
        if let Err(e) = l1_result {
            tracing::warn!(key, error = %e, "L1 delete failed");
        }
        if let Err(e) = l2_result {
            tracing::warn!(key, error = %e, "L2 delete failed");
        }
        Ok(())
    }
}
