//! Storage provisioning for [`crate::IsrEngine`] (spec §9 Design Notes):
//! two mutually-exclusive construction styles.
//!
//! - *Shorthand*: [`IsrEngineBuilder::with_cache_name`] provisions a default
//!   in-memory L1 (moka) + L2 (in-process `KvStore`), tag index, and lock
//!   provider, namespaced by the given name.
//! - *Advanced*: [`IsrEngineBuilder::with_storage`] lets the caller wire in
//!   their own layers (e.g. Redis-backed for L2, a relational tag index).
//!
//! Supplying both before [`IsrEngineBuilder::build`] is a configuration
//! error, not a silently-resolved precedence rule (§9): a constructor
//! check, not a doc comment.

use isr_cache::{
    CacheLayer, CompiledRoutes, InMemoryKvStore, InMemoryLockProvider, InMemoryTagIndex, MemoryCacheLayer,
    RemoteCacheLayer, SharedLockProvider, SharedTagIndex, TwoTierCache,
};
use isr_core::{Error, IsrConfig, Result};
use std::sync::Arc;

use crate::render::Render;
use crate::IsrEngine;

type CacheKeyFn = dyn Fn(&http::Uri) -> String + Send + Sync;
type ShouldCacheStatusFn = dyn Fn(u16) -> bool + Send + Sync;

struct ExplicitStorage {
    l1: Arc<dyn CacheLayer>,
    l2: Arc<dyn CacheLayer>,
    tag_index: SharedTagIndex,
    lock: SharedLockProvider,
}

pub struct IsrEngineBuilder {
    config: IsrConfig,
    renderer: Option<Arc<dyn Render>>,
    named_cache: Option<String>,
    explicit_storage: Option<ExplicitStorage>,
    cache_key_fn: Option<Arc<CacheKeyFn>>,
    should_cache_status: Option<Arc<ShouldCacheStatusFn>>,
    header_allowlist: Vec<String>,
}

impl IsrEngineBuilder {
    pub fn new(config: IsrConfig) -> Self {
        Self {
            config,
            renderer: None,
            named_cache: None,
            explicit_storage: None,
            cache_key_fn: None,
            should_cache_status: None,
            header_allowlist: Vec::new(),
        }
    }

    pub fn renderer(mut self, renderer: Arc<dyn Render>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Shorthand construction: provisions default in-memory storage,
    /// namespaced by `name`. Mutually exclusive with [`Self::with_storage`].
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.named_cache = Some(name.into());
        self
    }

    /// Advanced construction: the caller supplies every storage layer.
    /// Mutually exclusive with [`Self::with_cache_name`].
    pub fn with_storage(
        mut self,
        l1: Arc<dyn CacheLayer>,
        l2: Arc<dyn CacheLayer>,
        tag_index: SharedTagIndex,
        lock: SharedLockProvider,
    ) -> Self {
        self.explicit_storage = Some(ExplicitStorage { l1, l2, tag_index, lock });
        self
    }

    pub fn cache_key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&http::Uri) -> String + Send + Sync + 'static,
    {
        self.cache_key_fn = Some(Arc::new(f));
        self
    }

    pub fn should_cache_status<F>(mut self, f: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        self.should_cache_status = Some(Arc::new(f));
        self
    }

    /// Allows a request header through to the render callback even though
    /// it would otherwise be stripped as sensitive (§4.7).
    pub fn allow_request_header(mut self, name: impl Into<String>) -> Self {
        self.header_allowlist.push(name.into());
        self
    }

    pub fn build(self) -> Result<IsrEngine> {
        if self.named_cache.is_some() && self.explicit_storage.is_some() {
            return Err(Error::Configuration(
                "IsrEngineBuilder: with_cache_name (shorthand) and with_storage (advanced) are mutually exclusive"
                    .to_string(),
            ));
        }

        let renderer = self
            .renderer
            .ok_or_else(|| Error::Configuration("IsrEngineBuilder: a renderer is required".to_string()))?;

        let routes = CompiledRoutes::compile(&self.config.routes)?;

        let (cache, tag_index, lock): (Arc<dyn CacheLayer>, SharedTagIndex, SharedLockProvider) =
            if let Some(explicit) = self.explicit_storage {
                (
                    Arc::new(TwoTierCache::new(explicit.l1, explicit.l2)),
                    explicit.tag_index,
                    explicit.lock,
                )
            } else {
                let l1: Arc<dyn CacheLayer> = Arc::new(MemoryCacheLayer::default());
                let l2: Arc<dyn CacheLayer> = Arc::new(RemoteCacheLayer::new(
                    Arc::new(InMemoryKvStore::new()),
                    self.config.metadata_byte_budget,
                ));
                let tag_index: SharedTagIndex = Arc::new(InMemoryTagIndex::with_limits(
                    self.config.max_index_value_length,
                    self.config.max_tags_per_bulk_add,
                    self.config.tag_index_max_results,
                ));
                let lock: SharedLockProvider = Arc::new(InMemoryLockProvider::new());
                (Arc::new(TwoTierCache::new(l1, l2)), tag_index, lock)
            };

        Ok(IsrEngine::assemble(
            self.config,
            routes,
            cache,
            tag_index,
            lock,
            renderer,
            self.cache_key_fn,
            self.should_cache_status,
            self.header_allowlist,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderOutcome;
    use async_trait::async_trait;
    use bytes::Bytes;
    use isr_core::RenderResult;

    struct NoopRenderer;
    #[async_trait]
    impl Render for NoopRenderer {
        async fn render(&self, _request: crate::render::RenderRequest) -> Result<RenderOutcome> {
            Ok(RenderOutcome::Result(RenderResult::new(Bytes::from_static(b"x"), 200)))
        }
    }

    #[test]
    fn rejects_mixing_shorthand_and_advanced_storage() {
        let l1: Arc<dyn CacheLayer> = Arc::new(MemoryCacheLayer::default());
        let l2: Arc<dyn CacheLayer> = Arc::new(RemoteCacheLayer::new(Arc::new(InMemoryKvStore::new()), 1024));
        let tag_index: SharedTagIndex = Arc::new(InMemoryTagIndex::new());
        let lock: SharedLockProvider = Arc::new(InMemoryLockProvider::new());

        let result = IsrEngineBuilder::new(IsrConfig::default())
            .renderer(Arc::new(NoopRenderer))
            .with_cache_name("pages")
            .with_storage(l1, l2, tag_index, lock)
            .build();

        assert!(matches!(result.unwrap_err(), Error::Configuration(_)));
    }

    #[test]
    fn requires_a_renderer() {
        let result = IsrEngineBuilder::new(IsrConfig::default()).with_cache_name("pages").build();
        assert!(result.is_err());
    }

    #[test]
    fn shorthand_alone_builds_successfully() {
        let engine = IsrEngineBuilder::new(IsrConfig::default())
            .renderer(Arc::new(NoopRenderer))
            .with_cache_name("pages")
            .build();
        assert!(engine.is_ok());
    }

    #[test]
    fn advanced_alone_builds_successfully() {
        let l1: Arc<dyn CacheLayer> = Arc::new(MemoryCacheLayer::default());
        let l2: Arc<dyn CacheLayer> = Arc::new(RemoteCacheLayer::new(Arc::new(InMemoryKvStore::new()), 1024));
        let tag_index: SharedTagIndex = Arc::new(InMemoryTagIndex::new());
        let lock: SharedLockProvider = Arc::new(InMemoryLockProvider::new());

        let engine = IsrEngineBuilder::new(IsrConfig::default())
            .renderer(Arc::new(NoopRenderer))
            .with_storage(l1, l2, tag_index, lock)
            .build();
        assert!(engine.is_ok());
    }
}
