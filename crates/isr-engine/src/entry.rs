//! Builds a [`CacheEntry`] from a render result (C9, spec §4.9/§4.6 step 6):
//! resolves the effective tag list, validates and fits it, stamps metadata,
//! and strips the response headers a shared cache must never replay. Shared
//! by the foreground MISS path and the background revalidator so the two
//! can't drift on what "store this render result" means.

use isr_cache::metadata::{fit_metadata, validate_tags};
use isr_core::{CacheEntry, CacheEntryMetadata, RenderResult, RevalidateValue};

/// `revalidate` must already be resolved (render > route > default, §4.10)
/// and must not be [`RevalidateValue::NoStore`] — callers delete instead of
/// building an entry for that case.
#[allow(clippy::too_many_arguments)]
pub fn build_cache_entry(
    render: &RenderResult,
    fallback_tags: Option<&[String]>,
    created_at: i64,
    revalidate: RevalidateValue,
    metadata_byte_budget: usize,
    max_tag_length: usize,
    max_tags_per_entry: usize,
) -> CacheEntry {
    let raw_tags = render
        .tags
        .clone()
        .unwrap_or_else(|| fallback_tags.map(|t| t.to_vec()).unwrap_or_default());

    let tags = match validate_tags(&raw_tags, max_tag_length, max_tags_per_entry) {
        Ok(tags) => tags,
        Err(e) => {
            tracing::warn!(error = %e, "tag validation failed while building cache entry, storing without tags");
            Vec::new()
        }
    };

    let revalidate_after = match revalidate {
        RevalidateValue::Forever => None,
        RevalidateValue::NoStore => None,
        RevalidateValue::Ttl(seconds) => Some(created_at + (seconds * 1000.0).round() as i64),
    };

    let mut metadata = CacheEntryMetadata::new(created_at, revalidate_after, render.status, tags);
    fit_metadata(&mut metadata, metadata_byte_budget);

    let mut headers = render.headers.clone();
    crate::security::strip_forbidden_response_header_map(&mut headers);

    CacheEntry::new(render.body.clone(), headers, metadata)
}
