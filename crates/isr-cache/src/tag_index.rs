//! The tag → keys reverse index (C2, spec §4.2).
//!
//! The canonical implementation per §9 is a coordinator owning a small
//! relational table of `(tag, key)` pairs, avoiding the read-modify-write
//! races inherent in list-in-a-value designs. `DashMap<String, DashSet<String>>`
//! gives the same per-tag single-writer property in-process: each shard's
//! lock serializes concurrent inserts/removes for a given tag, and
//! different tags hash to (usually) different shards and proceed
//! independently, matching the concurrency model in spec §5.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use isr_core::{Error, Result};
use std::sync::Arc;

const DEFAULT_MAX_VALUE_LEN: usize = 2048;
const DEFAULT_MAX_TAGS_PER_BULK: usize = 64;
const DEFAULT_MAX_RESULTS: usize = 10_000;

#[async_trait]
pub trait TagIndex: Send + Sync {
    async fn add_key_to_tag(&self, tag: &str, key: &str) -> Result<()>;
    async fn add_key_to_tags(&self, tags: &[String], key: &str) -> Result<()>;
    async fn get_keys_by_tag(&self, tag: &str) -> Result<Vec<String>>;
    async fn remove_key_from_tag(&self, tag: &str, key: &str) -> Result<()>;
    async fn remove_all_keys_for_tag(&self, tag: &str) -> Result<()>;
}

/// In-process tag index backed by sharded concurrent maps. Strongly
/// consistent for this process; callers running multiple instances should
/// back this trait with a shared relational store instead (§4.2).
pub struct InMemoryTagIndex {
    tag_to_keys: DashMap<String, DashSet<String>>,
    max_value_len: usize,
    max_tags_per_bulk: usize,
    max_results: usize,
}

impl InMemoryTagIndex {
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_MAX_VALUE_LEN,
            DEFAULT_MAX_TAGS_PER_BULK,
            DEFAULT_MAX_RESULTS,
        )
    }

    pub fn with_limits(max_value_len: usize, max_tags_per_bulk: usize, max_results: usize) -> Self {
        Self {
            tag_to_keys: DashMap::new(),
            max_value_len,
            max_tags_per_bulk,
            max_results,
        }
    }

    fn validate_value(&self, kind: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(Error::Validation(format!("{kind} must not be empty")));
        }
        if value.len() > self.max_value_len {
            return Err(Error::Validation(format!(
                "{kind} length {} exceeds limit of {}",
                value.len(),
                self.max_value_len
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryTagIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TagIndex for InMemoryTagIndex {
    async fn add_key_to_tag(&self, tag: &str, key: &str) -> Result<()> {
        self.validate_value("tag", tag)?;
        self.validate_value("key", key)?;
        self.tag_to_keys
            .entry(tag.to_string())
            .or_insert_with(DashSet::new)
            .insert(key.to_string());
        Ok(())
    }

    async fn add_key_to_tags(&self, tags: &[String], key: &str) -> Result<()> {
        if tags.len() > self.max_tags_per_bulk {
            return Err(Error::Validation(format!(
                "bulk add of {} tags exceeds limit of {}",
                tags.len(),
                self.max_tags_per_bulk
            )));
        }
        self.validate_value("key", key)?;
        for tag in tags {
            self.validate_value("tag", tag)?;
        }
        // All inputs validated up-front: the loop below cannot fail
        // partway, giving an all-or-nothing write from the index's
        // perspective (§4.2).
        for tag in tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_insert_with(DashSet::new)
                .insert(key.to_string());
        }
        Ok(())
    }

    async fn get_keys_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        let Some(keys) = self.tag_to_keys.get(tag) else {
            return Ok(Vec::new());
        };
        let total = keys.len();
        if total > self.max_results {
            tracing::warn!(
                tag,
                total,
                max_results = self.max_results,
                "getKeysByTag truncated"
            );
        }
        Ok(keys.iter().take(self.max_results).map(|k| k.clone()).collect())
    }

    async fn remove_key_from_tag(&self, tag: &str, key: &str) -> Result<()> {
        if let Some(keys) = self.tag_to_keys.get(tag) {
            keys.remove(key);
        }
        Ok(())
    }

    async fn remove_all_keys_for_tag(&self, tag: &str) -> Result<()> {
        self.tag_to_keys.remove(tag);
        Ok(())
    }
}

/// Shared handle convenience, matching how the engine threads this trait
/// object through the revalidator and pipeline.
pub type SharedTagIndex = Arc<dyn TagIndex>;
