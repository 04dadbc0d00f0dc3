//! Background render + store + tag-index update under lock (C6, spec
//! §4.6): single-writer locking to avoid thundering herd, last-known-good
//! preservation on render failure, and bounded-concurrency tag purge.

use crate::entry::build_cache_entry;
use crate::render::{to_render_result, Render, RenderRequest};
use crate::security::prepare_render_request;
use futures::stream::{self, StreamExt};
use isr_cache::{key::page_key, key::lock_key, CacheLayer, SharedLockProvider, SharedTagIndex};
use isr_core::{IsrConfig, RouteConfig};
use std::sync::Arc;

pub struct Revalidator {
    cache: Arc<dyn CacheLayer>,
    tag_index: SharedTagIndex,
    lock: SharedLockProvider,
    renderer: Arc<dyn Render>,
    config: Arc<IsrConfig>,
    nonce: String,
    header_allowlist: Vec<String>,
}

impl Revalidator {
    pub fn new(
        cache: Arc<dyn CacheLayer>,
        tag_index: SharedTagIndex,
        lock: SharedLockProvider,
        renderer: Arc<dyn Render>,
        config: Arc<IsrConfig>,
        nonce: String,
    ) -> Self {
        Self::with_header_allowlist(cache, tag_index, lock, renderer, config, nonce, Vec::new())
    }

    pub fn with_header_allowlist(
        cache: Arc<dyn CacheLayer>,
        tag_index: SharedTagIndex,
        lock: SharedLockProvider,
        renderer: Arc<dyn Render>,
        config: Arc<IsrConfig>,
        nonce: String,
        header_allowlist: Vec<String>,
    ) -> Self {
        Self {
            cache,
            tag_index,
            lock,
            renderer,
            config,
            nonce,
            header_allowlist,
        }
    }

    /// Background path (§4.6 steps 1-8). Never panics or propagates: every
    /// failure is logged and leaves the existing cache entry untouched.
    pub async fn revalidate(&self, key: &str, request: RenderRequest, route_config: Option<RouteConfig>) {
        let storage_key = page_key(key, self.config.storage_key_budget);
        let lock_name = lock_key(key, self.config.storage_key_budget);

        match self.lock.acquire(&lock_name, self.config.lock_ttl).await {
            Ok(None) => {
                tracing::debug!(key, "revalidate: lock held by another worker, skipping");
            }
            Ok(Some(handle)) => {
                self.render_and_store(key, &storage_key, request, route_config).await;
                handle.release();
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "revalidate: lock acquire failed, proceeding without lock");
                self.render_and_store(key, &storage_key, request, route_config).await;
            }
        }
    }

    async fn render_and_store(
        &self,
        key: &str,
        storage_key: &str,
        mut request: RenderRequest,
        route_config: Option<RouteConfig>,
    ) {
        prepare_render_request(&mut request, &self.nonce, &self.header_allowlist);

        let timeout = self.config.background_render_timeout();
        let outcome = match tokio::time::timeout(timeout, self.renderer.render(request)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(key, error = %e, "background render failed, preserving last-known-good");
                return;
            }
            Err(_) => {
                tracing::error!(key, ?timeout, "background render timed out, preserving last-known-good");
                return;
            }
        };

        let render_result = to_render_result(outcome);

        let revalidate = render_result
            .revalidate
            .or_else(|| route_config.as_ref().and_then(|c| c.revalidate))
            .unwrap_or(self.config.default_revalidate);

        if revalidate.is_no_store() {
            if let Err(e) = self.cache.delete(storage_key).await {
                tracing::warn!(key, error = %e, "revalidate: delete-on-no-store failed");
            }
            return;
        }

        let now = chrono::Utc::now().timestamp_millis();
        let fallback_tags = route_config.as_ref().and_then(|c| c.tags.as_deref());
        let entry = build_cache_entry(
            &render_result,
            fallback_tags,
            now,
            revalidate,
            self.config.metadata_byte_budget,
            self.config.max_tag_length,
            self.config.max_tags_per_entry,
        );
        let tags_for_index = entry.metadata.tags.clone();

        let (cache_result, index_result) = tokio::join!(
            self.cache.put(storage_key, entry),
            self.tag_index.add_key_to_tags(&tags_for_index, storage_key)
        );

        if let Err(e) = cache_result {
            tracing::warn!(key, error = %e, "revalidate: cache put failed");
        }
        if let Err(e) = index_result {
            tracing::warn!(key, error = %e, "revalidate: tag index update failed, cache write preserved");
        }
    }

    /// Delete-only purge (§4.6): no re-render, no tag cleanup. Tag edges
    /// are swept lazily on the next `revalidate_tag`.
    pub async fn revalidate_path(&self, key: &str) {
        let storage_key = page_key(key, self.config.storage_key_budget);
        if let Err(e) = self.cache.delete(&storage_key).await {
            tracing::warn!(key, error = %e, "revalidatePath: delete failed");
        }
    }

    /// Bounded-concurrency fan-out purge by tag (§4.6), followed by a
    /// wholesale sweep of any residual `(tag, key)` edges.
    pub async fn revalidate_tag(&self, tag: &str) {
        let keys = match self.tag_index.get_keys_by_tag(tag).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(tag, error = %e, "revalidateTag: failed to list keys, aborting purge");
                return;
            }
        };

        let concurrency = self.config.tag_purge_concurrency.max(1);
        let cache = self.cache.clone();
        let tag_index = self.tag_index.clone();
        let tag_owned = tag.to_string();

        stream::iter(keys)
            .for_each_concurrent(concurrency, move |storage_key| {
                let cache = cache.clone();
                let tag_index = tag_index.clone();
                let tag = tag_owned.clone();
                async move {
                    if let Err(e) = cache.delete(&storage_key).await {
                        tracing::warn!(storage_key, error = %e, "revalidateTag: cache delete failed");
                    }
                    if let Err(e) = tag_index.remove_key_from_tag(&tag, &storage_key).await {
                        tracing::warn!(storage_key, error = %e, "revalidateTag: edge removal failed");
                    }
                }
            })
            .await;

        if let Err(e) = self.tag_index.remove_all_keys_for_tag(tag).await {
            tracing::warn!(tag, error = %e, "revalidateTag: wholesale sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderOutcome;
    use bytes::Bytes;
    use isr_cache::{InMemoryLockProvider, InMemoryTagIndex, MemoryCacheLayer};
    use isr_core::{CacheEntry, CacheEntryMetadata, CacheStatus, RenderResult, RevalidateValue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRenderer {
        calls: Arc<AtomicUsize>,
        response: RenderResult,
    }

    #[async_trait::async_trait]
    impl Render for CountingRenderer {
        async fn render(&self, _request: RenderRequest) -> isr_core::Result<RenderOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RenderOutcome::Result(self.response.clone()))
        }
    }

    fn request() -> RenderRequest {
        http::Request::builder()
            .uri("/x")
            .body(Bytes::new())
            .unwrap()
    }

    fn revalidator(renderer: CountingRenderer) -> (Revalidator, Arc<dyn CacheLayer>, SharedTagIndex) {
        let cache: Arc<dyn CacheLayer> = Arc::new(MemoryCacheLayer::default());
        let tag_index: SharedTagIndex = Arc::new(InMemoryTagIndex::new());
        let lock: SharedLockProvider = Arc::new(InMemoryLockProvider::new());
        let config = Arc::new(IsrConfig::default());
        let rev = Revalidator::new(
            cache.clone(),
            tag_index.clone(),
            lock,
            Arc::new(renderer),
            config,
            "nonce".to_string(),
        );
        (rev, cache, tag_index)
    }

    #[tokio::test]
    async fn revalidate_writes_cache_and_tag_index() {
        let renderer = CountingRenderer {
            calls: Arc::new(AtomicUsize::new(0)),
            response: RenderResult::new(Bytes::from_static(b"B"), 200).with_tags(vec!["blog".to_string()]),
        };
        let (rev, cache, tag_index) = revalidator(renderer);

        rev.revalidate("/x", request(), None).await;

        let (found, status) = cache.get("page:/x").await.unwrap();
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(found.unwrap().body, Bytes::from_static(b"B"));
        assert_eq!(
            tag_index.get_keys_by_tag("blog").await.unwrap(),
            vec!["page:/x".to_string()]
        );
    }

    #[tokio::test]
    async fn no_store_revalidate_deletes_entry() {
        let renderer = CountingRenderer {
            calls: Arc::new(AtomicUsize::new(0)),
            response: RenderResult::new(Bytes::from_static(b"C"), 200)
                .with_revalidate(RevalidateValue::NoStore),
        };
        let (rev, cache, _tags) = revalidator(renderer);
        cache
            .put(
                "page:/x",
                CacheEntry::new(
                    Bytes::from_static(b"old"),
                    Default::default(),
                    CacheEntryMetadata::new(0, Some(1), 200, vec![]),
                ),
            )
            .await
            .unwrap();

        rev.revalidate("/x", request(), None).await;

        let (found, _) = cache.get("page:/x").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn render_error_preserves_last_known_good() {
        struct FailingRenderer;
        #[async_trait::async_trait]
        impl Render for FailingRenderer {
            async fn render(&self, _request: RenderRequest) -> isr_core::Result<RenderOutcome> {
                Err(isr_core::Error::RenderFailed("boom".to_string()))
            }
        }

        let cache: Arc<dyn CacheLayer> = Arc::new(MemoryCacheLayer::default());
        let tag_index: SharedTagIndex = Arc::new(InMemoryTagIndex::new());
        let lock: SharedLockProvider = Arc::new(InMemoryLockProvider::new());
        let config = Arc::new(IsrConfig::default());
        let rev = Revalidator::new(cache.clone(), tag_index, lock, Arc::new(FailingRenderer), config, "n".into());

        let old_entry = CacheEntry::new(
            Bytes::from_static(b"old"),
            Default::default(),
            CacheEntryMetadata::new(0, Some(1), 200, vec![]),
        );
        cache.put("page:/x", old_entry).await.unwrap();

        rev.revalidate("/x", request(), None).await;

        let (found, _) = cache.get("page:/x").await.unwrap();
        assert_eq!(found.unwrap().body, Bytes::from_static(b"old"));
    }

    #[tokio::test]
    async fn second_concurrent_revalidate_is_skipped_while_lock_held() {
        let cache: Arc<dyn CacheLayer> = Arc::new(MemoryCacheLayer::default());
        let tag_index: SharedTagIndex = Arc::new(InMemoryTagIndex::new());
        let lock: SharedLockProvider = Arc::new(InMemoryLockProvider::new());
        let config = Arc::new(IsrConfig::default());

        // Pre-acquire the lock under the name the revalidator itself would use.
        let held = lock.acquire("lock:/x", config.lock_ttl).await.unwrap();
        assert!(held.is_some());

        let renderer = CountingRenderer {
            calls: Arc::new(AtomicUsize::new(0)),
            response: RenderResult::new(Bytes::from_static(b"B"), 200),
        };
        let rev = Revalidator::new(cache.clone(), tag_index, lock, Arc::new(renderer), config, "n".into());

        rev.revalidate("/x", request(), None).await;

        let (found, _) = cache.get("page:/x").await.unwrap();
        assert!(found.is_none(), "skipped revalidation must not write the cache");
    }

    #[tokio::test]
    async fn revalidate_path_deletes_without_rerendering() {
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = CountingRenderer {
            calls: calls.clone(),
            response: RenderResult::new(Bytes::from_static(b"unused"), 200),
        };
        let (rev, cache, _tags) = revalidator(renderer);
        cache
            .put(
                "page:/x",
                CacheEntry::new(Bytes::from_static(b"old"), Default::default(), CacheEntryMetadata::new(0, None, 200, vec![])),
            )
            .await
            .unwrap();

        rev.revalidate_path("/x").await;

        let (found, _) = cache.get("page:/x").await.unwrap();
        assert!(found.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn revalidate_tag_purges_every_key_and_the_tag_itself() {
        let renderer = CountingRenderer {
            calls: Arc::new(AtomicUsize::new(0)),
            response: RenderResult::new(Bytes::from_static(b"unused"), 200),
        };
        let (rev, cache, tag_index) = revalidator(renderer);

        for path in ["/a", "/b", "/c"] {
            let storage_key = format!("page:{path}");
            cache
                .put(
                    &storage_key,
                    CacheEntry::new(Bytes::from_static(b"x"), Default::default(), CacheEntryMetadata::new(0, None, 200, vec!["blog".to_string()])),
                )
                .await
                .unwrap();
            tag_index.add_key_to_tag("blog", &storage_key).await.unwrap();
        }

        rev.revalidate_tag("blog").await;

        for path in ["/a", "/b", "/c"] {
            let storage_key = format!("page:{path}");
            let (found, _) = cache.get(&storage_key).await.unwrap();
            assert!(found.is_none());
        }
        assert!(tag_index.get_keys_by_tag("blog").await.unwrap().is_empty());
    }
}
