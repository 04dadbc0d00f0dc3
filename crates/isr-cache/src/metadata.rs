//! Tag validation and metadata-fitting (C9, spec §4.9).
//!
//! These two operations are what keep a cache entry's stored tags and the
//! tag index's edges consistent (testable property 4): whatever
//! `fit_metadata` decides to keep is both what gets written to the entry
//! and what the caller must hand to the tag index.

use isr_core::{CacheEntryMetadata, Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Default per-tag length cap (§4.9), used when a caller has no `IsrConfig`
/// in hand (e.g. a standalone `isr-cache` consumer).
pub const DEFAULT_MAX_TAG_LENGTH: usize = 128;
/// Default tag-count-per-entry cap (§4.9).
pub const DEFAULT_MAX_TAGS_PER_ENTRY: usize = 64;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-.:/]+$").unwrap());

/// Validates and normalizes a raw tag list: trims, drops duplicates
/// (keeping first occurrence, preserving order), and rejects anything
/// outside the allowed character set, length, or count. `max_tag_length`
/// and `max_tags_per_entry` are the `IsrConfig` knobs backing §4.9's
/// per-entry tag limits.
pub fn validate_tags(raw_tags: &[String], max_tag_length: usize, max_tags_per_entry: usize) -> Result<Vec<String>> {
    let mut seen = std::collections::HashSet::new();
    let mut tags = Vec::with_capacity(raw_tags.len());

    for raw in raw_tags {
        let tag = raw.trim().to_string();
        if tag.is_empty() {
            return Err(Error::TagInvalid {
                tag: raw.clone(),
                reason: "tag must not be empty".to_string(),
            });
        }
        if tag.len() > max_tag_length {
            return Err(Error::TagInvalid {
                tag: tag.clone(),
                reason: format!("tag length {} exceeds {max_tag_length}", tag.len()),
            });
        }
        if !TAG_PATTERN.is_match(&tag) {
            return Err(Error::TagInvalid {
                tag: tag.clone(),
                reason: "tag contains characters outside [A-Za-z0-9_-.:/]".to_string(),
            });
        }
        if seen.insert(tag.clone()) {
            tags.push(tag);
        }
    }

    if tags.len() > max_tags_per_entry {
        return Err(Error::TooManyTags {
            count: tags.len(),
            limit: max_tags_per_entry,
        });
    }

    Ok(tags)
}

/// Greedily trims trailing tags from `metadata` until its serialized form
/// fits `byte_budget`. Mutates `metadata.tags` in place and returns the
/// number of tags dropped. If even the empty-tag metadata overflows, all
/// tags are dropped and a warning is logged (the caller still gets a valid,
/// if tag-less, metadata back).
pub fn fit_metadata(metadata: &mut CacheEntryMetadata, byte_budget: usize) -> usize {
    let mut dropped = 0;
    while metadata.serialized_len() > byte_budget && !metadata.tags.is_empty() {
        metadata.tags.pop();
        dropped += 1;
    }

    if metadata.serialized_len() > byte_budget {
        tracing::warn!(
            byte_budget,
            "cache entry metadata exceeds budget even with no tags"
        );
    } else if dropped > 0 {
        tracing::warn!(dropped, byte_budget, "cache entry metadata tags truncated to fit budget");
    }

    dropped
}
