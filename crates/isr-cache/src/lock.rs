//! Best-effort mutual exclusion for background revalidation (C5, spec §4.5).
//!
//! A lock is advisory: failure to acquire means "someone else is already
//! revalidating this key", not a correctness requirement. Handles release
//! on `Drop` so a panicking or early-returning revalidator can't leak a
//! lock past its TTL.

use async_trait::async_trait;
use dashmap::DashMap;
use isr_core::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// An acquired lock. Dropping it releases the lock; `release()` does the
/// same but lets the caller observe whether the release reached the
/// backing store.
pub struct LockHandle {
    release_tx: Option<oneshot::Sender<()>>,
}

impl LockHandle {
    fn new(release_tx: oneshot::Sender<()>) -> Self {
        Self {
            release_tx: Some(release_tx),
        }
    }

    pub fn release(mut self) {
        if let Some(tx) = self.release_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.release_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Attempts to acquire an exclusive lock on `key` for up to `ttl`.
    /// Returns `None` if the lock is already held.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>>;
}

struct InMemoryLock {
    expires_at: Instant,
}

/// A process-local lock provider backed by a `DashMap`. Expired locks are
/// reclaimed lazily on the next `acquire` for that key rather than via a
/// background sweep, since a single-instance deployment only ever touches
/// a key's lock from an `acquire` call.
#[derive(Default)]
pub struct InMemoryLockProvider {
    locks: Arc<DashMap<String, InMemoryLock>>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>> {
        let now = Instant::now();
        let mut held = false;

        self.locks
            .entry(key.to_string())
            .and_modify(|lock| {
                if lock.expires_at > now {
                    held = true;
                } else {
                    lock.expires_at = now + ttl;
                }
            })
            .or_insert_with(|| InMemoryLock {
                expires_at: now + ttl,
            });

        if held {
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        let locks = self.locks.clone();
        let key_owned = key.to_string();
        tokio::spawn(async move {
            let _ = rx.await;
            locks.remove(&key_owned);
        });

        Ok(Some(LockHandle::new(tx)))
    }
}

#[cfg(feature = "redis")]
pub mod redis_lock {
    use super::{LockHandle, LockProvider};
    use async_trait::async_trait;
    use isr_core::{Error, Result};
    use redis::AsyncCommands;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Redis-backed lock using `SET key NX PX ttl`, released with a `DEL`
    /// guarded by the holder's random token so a handle can never release a
    /// lock it didn't acquire.
    pub struct RedisLockProvider {
        pool: deadpool_redis::Pool,
    }

    impl RedisLockProvider {
        pub async fn connect(url: &str) -> Result<Self> {
            let cfg = deadpool_redis::Config::from_url(url);
            let pool = cfg
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                .map_err(|e| Error::cache_layer_unavailable(format!("redis pool init failed: {e}")))?;
            Ok(Self { pool })
        }
    }

    #[async_trait]
    impl LockProvider for RedisLockProvider {
        async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| Error::cache_layer_unavailable(format!("redis checkout failed: {e}")))?;

            let token: u64 = rand::random();
            let lock_key = format!("{key}:lock");
            let reply: Option<String> = redis::cmd("SET")
                .arg(&lock_key)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(&mut conn)
                .await
                .map_err(|_| Error::LockUnavailable)?;

            if reply.is_none() {
                return Ok(None);
            }

            let (tx, rx) = oneshot::channel();
            let pool = self.pool.clone();
            tokio::spawn(async move {
                let _ = rx.await;
                if let Ok(mut conn) = pool.get().await {
                    let script = redis::Script::new(
                        r"if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end",
                    );
                    let _: Result<i32, _> = script
                        .key(lock_key)
                        .arg(token)
                        .invoke_async(&mut conn)
                        .await;
                }
            });

            Ok(Some(LockHandle::new(tx)))
        }
    }
}

pub type SharedLockProvider = Arc<dyn LockProvider>;
