//! Core data model: cache entries, route configuration, and the statuses
//! that flow through the two-tier cache and the request pipeline.
//!
//! Headers are represented as a plain, ordered `BTreeMap<String, String>`
//! rather than `http::HeaderMap` at this layer: `CacheEntry` must be
//! serializable (it crosses into L2's out-of-band metadata slot and main
//! value), and `http::HeaderMap` carries no `serde` impl. Conversion to/from
//! `http::HeaderMap` happens at the request-pipeline boundary in
//! `isr-engine`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type HeaderMap = BTreeMap<String, String>;

/// The three values a `revalidate` field may resolve to (§4.10).
///
/// `revalidate = 0` and any `revalidate < 0` are both treated as `NoStore`
/// (spec §9 Open Question: negative numbers are accepted as no-store rather
/// than rejected as invalid input, mirroring the source behavior).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "seconds")]
pub enum RevalidateValue {
    /// Positive number of seconds until the entry is considered stale.
    Ttl(f64),
    /// `revalidate <= 0`: do not cache, always render fresh.
    NoStore,
    /// Never goes stale once written.
    Forever,
}

impl RevalidateValue {
    pub fn from_seconds(seconds: f64) -> Self {
        if seconds <= 0.0 {
            RevalidateValue::NoStore
        } else {
            RevalidateValue::Ttl(seconds)
        }
    }

    pub fn is_no_store(&self) -> bool {
        matches!(self, RevalidateValue::NoStore)
    }

    pub fn is_forever(&self) -> bool {
        matches!(self, RevalidateValue::Forever)
    }

    pub fn seconds(&self) -> Option<f64> {
        match self {
            RevalidateValue::Ttl(s) => Some(*s),
            _ => None,
        }
    }
}

/// Per-route configuration. `None` fields mean "inherit" (from defaults, or
/// from the engine-wide default) rather than "explicitly unset".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    pub revalidate: Option<RevalidateValue>,
    pub tags: Option<Vec<String>>,
}

impl RouteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_revalidate(mut self, revalidate: RevalidateValue) -> Self {
        self.revalidate = Some(revalidate);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// Metadata stored alongside a cache entry's body/headers.
///
/// Invariant: `revalidate_after = None` means "forever"; otherwise
/// `created_at <= revalidate_after`. `tags` holds only validated,
/// deduplicated tags, pre-truncated to fit the serialized metadata inside a
/// configured byte budget (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMetadata {
    pub created_at: i64,
    pub revalidate_after: Option<i64>,
    pub status: u16,
    pub tags: Vec<String>,
}

impl CacheEntryMetadata {
    pub fn new(created_at: i64, revalidate_after: Option<i64>, status: u16, tags: Vec<String>) -> Self {
        debug_assert!(
            revalidate_after.is_none_or_ge(created_at),
            "revalidate_after must not precede created_at"
        );
        Self {
            created_at,
            revalidate_after,
            status,
            tags,
        }
    }

    pub fn is_forever(&self) -> bool {
        self.revalidate_after.is_none()
    }

    /// Staleness classification against a point in time (millis).
    pub fn is_stale_at(&self, now_millis: i64) -> bool {
        match self.revalidate_after {
            None => false,
            Some(revalidate_after) => now_millis >= revalidate_after,
        }
    }

    /// Serialized byte length of this metadata, used by the metadata-fitting
    /// algorithm (§4.9) to decide whether tags must be trimmed.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

trait NoneOrGe {
    fn is_none_or_ge(&self, other: i64) -> bool;
}

impl NoneOrGe for Option<i64> {
    fn is_none_or_ge(&self, other: i64) -> bool {
        match self {
            None => true,
            Some(v) => *v >= other,
        }
    }
}

/// Body + headers + metadata for one cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub body: Bytes,
    pub headers: HeaderMap,
    pub metadata: CacheEntryMetadata,
}

impl CacheEntry {
    pub fn new(body: Bytes, headers: HeaderMap, metadata: CacheEntryMetadata) -> Self {
        Self {
            body,
            headers,
            metadata,
        }
    }
}

/// What the render callback returns, or what a raw `http::Response` is
/// converted into before the engine can act on it (§6).
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub body: Bytes,
    pub status: u16,
    pub headers: HeaderMap,
    pub tags: Option<Vec<String>>,
    pub revalidate: Option<RevalidateValue>,
}

impl RenderResult {
    pub fn new(body: impl Into<Bytes>, status: u16) -> Self {
        Self {
            body: body.into(),
            status,
            headers: HeaderMap::new(),
            tags: None,
            revalidate: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_revalidate(mut self, revalidate: RevalidateValue) -> Self {
        self.revalidate = Some(revalidate);
        self
    }
}

/// Status of a single cache-layer read (§4.3/§4.4). Distinct from
/// [`IsrStatus`], which is the response-facing status that also covers
/// `BYPASS`/`SKIP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
}

/// The value of the `X-ISR-Status` response header (§4.7/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrStatus {
    Miss,
    Hit,
    Stale,
    Bypass,
    Skip,
}

impl IsrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsrStatus::Miss => "MISS",
            IsrStatus::Hit => "HIT",
            IsrStatus::Stale => "STALE",
            IsrStatus::Bypass => "BYPASS",
            IsrStatus::Skip => "SKIP",
        }
    }
}

impl std::fmt::Display for IsrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
