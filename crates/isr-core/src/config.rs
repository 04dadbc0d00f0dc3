//! Declarative ISR configuration (§6): everything that can be expressed as
//! plain data, independent of which storage layers back the engine. The
//! storage-layer wiring itself (the "shorthand vs advanced" constructor
//! split from §9) lives in `isr-engine`, since it has to name concrete
//! `isr-cache` types that this crate must not depend on.

use crate::types::RevalidateValue;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::RouteConfig;

/// Route pattern → configuration, preserving insertion order: `matchRoute`
/// is a first-match-wins linear scan over this order (§4.1), so callers
/// control precedence by the order they add routes in (e.g. exact routes
/// before parametric ones).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteTable(pub Vec<(String, RouteConfig)>);

impl RouteTable {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(mut self, pattern: impl Into<String>, config: RouteConfig) -> Self {
        self.0.push((pattern.into(), config));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, RouteConfig)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Top-level engine configuration (§6 "Configuration (enumerated)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsrConfig {
    /// Route pattern table. Empty means "cache all GET/HEAD paths".
    pub routes: RouteTable,
    /// Engine-wide fallback when neither the render result nor the route
    /// config specify a `revalidate` value.
    pub default_revalidate: RevalidateValue,
    /// Foreground render timeout. Background revalidation doubles this.
    pub render_timeout: Duration,
    /// Whether to take a best-effort lock before a foreground MISS render.
    pub lock_on_miss: bool,
    /// Whether to emit `X-ISR-Status` / `X-ISR-Cache-Date` headers.
    pub expose_headers: bool,
    /// Opaque storage-layer namespace, used to derive default L1/L2
    /// instances when the shorthand constructor is used.
    pub cache_name: String,
    /// Optional bypass secret compared constant-time against the bypass
    /// header/cookie (§4.11).
    pub bypass_token: Option<String>,
    /// Byte budget for serialized `CacheEntryMetadata` (§3, default 1024).
    pub metadata_byte_budget: usize,
    /// Maximum tags per cache entry (§4.9, default 64).
    pub max_tags_per_entry: usize,
    /// Maximum tag length in bytes (§4.9, default 128).
    pub max_tag_length: usize,
    /// Maximum length of a tag-index key/tag accepted at the wire boundary
    /// (§4.2, default 2048). Distinct from `max_tag_length`, which bounds
    /// tags actually stored on a cache entry.
    pub max_index_value_length: usize,
    /// Maximum number of tags accepted per `addKeyToTags` call (§4.2,
    /// default 64).
    pub max_tags_per_bulk_add: usize,
    /// Storage-key length budget before falling back to a hashed key
    /// (§3, default 480 bytes).
    pub storage_key_budget: usize,
    /// Cap on results returned by `getKeysByTag` (§4.2, default 10,000).
    pub tag_index_max_results: usize,
    /// Bounded concurrency for `revalidateTag`'s fan-out (§4.6, default 25).
    pub tag_purge_concurrency: usize,
    /// Safety TTL bounding an orphaned lock (§4.5, default 60s).
    pub lock_ttl: Duration,
}

impl Default for IsrConfig {
    fn default() -> Self {
        Self {
            routes: RouteTable::default(),
            default_revalidate: RevalidateValue::Ttl(60.0),
            render_timeout: Duration::from_millis(25_000),
            lock_on_miss: true,
            expose_headers: true,
            cache_name: "isr".to_string(),
            bypass_token: None,
            metadata_byte_budget: 1024,
            max_tags_per_entry: 64,
            max_tag_length: 128,
            max_index_value_length: 2048,
            max_tags_per_bulk_add: 64,
            storage_key_budget: 480,
            tag_index_max_results: 10_000,
            tag_purge_concurrency: 25,
            lock_ttl: Duration::from_secs(60),
        }
    }
}

impl IsrConfig {
    pub fn background_render_timeout(&self) -> Duration {
        self.render_timeout * 2
    }
}
