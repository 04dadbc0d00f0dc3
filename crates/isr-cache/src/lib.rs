//! Cache storage, addressing, and invalidation: route matching, key
//! derivation, the two cache tiers and their composition, the tag reverse
//! index, and the best-effort lock used by background revalidation.

pub mod composite;
pub mod key;
pub mod layer;
pub mod lock;
pub mod memory;
pub mod metadata;
pub mod pattern;
pub mod remote;
pub mod tag_index;

pub use composite::TwoTierCache;
pub use key::{derive, dual_hash_hex, lock_key, normalize, page_key};
pub use layer::{classify, CacheLayer};
pub use lock::{InMemoryLockProvider, LockHandle, LockProvider, SharedLockProvider};
pub use memory::MemoryCacheLayer;
pub use metadata::{fit_metadata, validate_tags};
pub use pattern::{compile_pattern, CompiledRoutes, RouteMatch};
pub use remote::{InMemoryKvStore, KvStore, RemoteCacheLayer};
pub use tag_index::{InMemoryTagIndex, SharedTagIndex, TagIndex};

#[cfg(feature = "redis")]
pub use lock::redis_lock::RedisLockProvider;
#[cfg(feature = "redis")]
pub use remote::redis_store::RedisKvStore;
