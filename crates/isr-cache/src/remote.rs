//! L2: a globally-consistent, non-evicting cache layer (C3, spec §4.3).
//!
//! L2 never evicts on its own — stale entries must persist so
//! stale-while-revalidate has something to serve. The concrete byte store
//! is abstracted behind [`KvStore`] so a deployment can back it with Redis,
//! an object store, or (for tests/dev) the in-process [`InMemoryKvStore`].
//! Body and headers are kept as the "main value"; metadata is kept
//! separate to mirror the out-of-band metadata slot described in §4.3, and
//! is fitted to `metadata_byte_budget` on every write.

use crate::layer::{classify, now_millis, CacheLayer};
use crate::metadata::fit_metadata;
use async_trait::async_trait;
use isr_core::{CacheEntry, CacheEntryMetadata, CacheStatus, Error, HeaderMap, Result};
use std::sync::Arc;

type StoredRecord = (Vec<u8>, Vec<u8>, Vec<u8>); // (body, headers_json, metadata_json)

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>>;
    async fn put(&self, key: &str, body: Vec<u8>, headers_json: Vec<u8>, metadata_json: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process, non-evicting store. Suitable for tests and single-instance
/// deployments; a genuinely global L2 should back `KvStore` with a shared
/// store instead (Redis, object storage, etc).
#[derive(Default)]
pub struct InMemoryKvStore {
    records: dashmap::DashMap<String, StoredRecord>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn put(&self, key: &str, body: Vec<u8>, headers_json: Vec<u8>, metadata_json: Vec<u8>) -> Result<()> {
        self.records
            .insert(key.to_string(), (body, headers_json, metadata_json));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }
}

pub struct RemoteCacheLayer<S: KvStore> {
    store: Arc<S>,
    metadata_byte_budget: usize,
}

impl<S: KvStore> RemoteCacheLayer<S> {
    pub fn new(store: Arc<S>, metadata_byte_budget: usize) -> Self {
        Self {
            store,
            metadata_byte_budget,
        }
    }
}

#[async_trait]
impl<S: KvStore> CacheLayer for RemoteCacheLayer<S> {
    async fn get(&self, key: &str) -> Result<(Option<CacheEntry>, CacheStatus)> {
        let record = match self.store.get(key).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key, error = %e, "L2 read failed, degrading to MISS");
                return Ok((None, CacheStatus::Miss));
            }
        };

        let Some((body, headers_json, metadata_json)) = record else {
            return Ok((None, CacheStatus::Miss));
        };

        let headers: HeaderMap = match serde_json::from_slice(&headers_json) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(key, error = %e, "L2 entry failed header schema validation, degrading to MISS");
                return Ok((None, CacheStatus::Miss));
            }
        };
        let metadata: CacheEntryMetadata = match serde_json::from_slice(&metadata_json) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(key, error = %e, "L2 entry failed metadata schema validation, degrading to MISS");
                return Ok((None, CacheStatus::Miss));
            }
        };

        let entry = CacheEntry::new(body.into(), headers, metadata);
        let status = classify(&entry.metadata, now_millis());
        Ok((Some(entry), status))
    }

    async fn put(&self, key: &str, mut entry: CacheEntry) -> Result<()> {
        fit_metadata(&mut entry.metadata, self.metadata_byte_budget);

        let headers_json = serde_json::to_vec(&entry.headers)
            .map_err(|e| Error::cache_write_failed(format!("header serialization failed: {e}")))?;
        let metadata_json = serde_json::to_vec(&entry.metadata)
            .map_err(|e| Error::cache_write_failed(format!("metadata serialization failed: {e}")))?;

        self.store
            .put(key, entry.body.to_vec(), headers_json, metadata_json)
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }
}

#[cfg(feature = "redis")]
pub mod redis_store {
    use super::{KvStore, StoredRecord};
    use async_trait::async_trait;
    use isr_core::{Error, Result};
    use redis::AsyncCommands;

    /// Redis-backed [`KvStore`]: each logical record is three keys sharing
    /// a prefix (`{key}`, `{key}:h`, `{key}:m`) so the main value and the
    /// metadata slot can be read/written independently (§4.3's L2 split).
    pub struct RedisKvStore {
        pool: deadpool_redis::Pool,
    }

    impl RedisKvStore {
        pub async fn connect(url: &str) -> Result<Self> {
            let cfg = deadpool_redis::Config::from_url(url);
            let pool = cfg
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                .map_err(|e| Error::cache_layer_unavailable(format!("redis pool init failed: {e}")))?;
            Ok(Self { pool })
        }

        async fn conn(&self) -> Result<deadpool_redis::Connection> {
            self.pool
                .get()
                .await
                .map_err(|e| Error::cache_layer_unavailable(format!("redis checkout failed: {e}")))
        }
    }

    #[async_trait]
    impl KvStore for RedisKvStore {
        async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
            let mut conn = self.conn().await?;
            let body: Option<Vec<u8>> = conn
                .get(key)
                .await
                .map_err(|e| Error::cache_layer_unavailable(e.to_string()))?;
            let Some(body) = body else { return Ok(None) };
            let headers: Vec<u8> = conn
                .get(format!("{key}:h"))
                .await
                .map_err(|e| Error::cache_layer_unavailable(e.to_string()))?;
            let metadata: Vec<u8> = conn
                .get(format!("{key}:m"))
                .await
                .map_err(|e| Error::cache_layer_unavailable(e.to_string()))?;
            Ok(Some((body, headers, metadata)))
        }

        async fn put(
            &self,
            key: &str,
            body: Vec<u8>,
            headers_json: Vec<u8>,
            metadata_json: Vec<u8>,
        ) -> Result<()> {
            let mut conn = self.conn().await?;
            let _: () = conn
                .set(key, body)
                .await
                .map_err(|e| Error::cache_write_failed(e.to_string()))?;
            let _: () = conn
                .set(format!("{key}:h"), headers_json)
                .await
                .map_err(|e| Error::cache_write_failed(e.to_string()))?;
            let _: () = conn
                .set(format!("{key}:m"), metadata_json)
                .await
                .map_err(|e| Error::cache_write_failed(e.to_string()))?;
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            let mut conn = self.conn().await?;
            let _: () = conn
                .del((key, format!("{key}:h"), format!("{key}:m")))
                .await
                .map_err(|e| Error::cache_write_failed(e.to_string()))?;
            Ok(())
        }
    }
}
