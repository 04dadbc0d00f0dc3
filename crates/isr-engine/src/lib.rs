//! # isr-engine
//!
//! The ISR request pipeline (C7, spec §4.7): the state machine that turns an
//! incoming request into a MISS/HIT/STALE/SKIP/BYPASS response using the
//! key derivation and two-tier cache from `isr-cache`, a caller-supplied
//! render callback, background revalidation with single-writer locking
//! (C6), and a per-request config scope (C8). The security-hardened
//! primitives that operate on requests and responses — the recursion
//! nonce, sensitive-header stripping, forbidden-response-header stripping,
//! Host validation, constant-time comparison — live here too, since they
//! only make sense once there's an HTTP request/response in hand.
//!
//! Framework adapters, the render engine itself, and the wire form of the
//! revalidation HTTP endpoint are out of scope: this crate hands an
//! adapter an [`IsrEngine`] to drive and a [`Render`] trait to implement.

pub mod ctx;
pub mod entry;
pub mod options;
pub mod render;
pub mod response;
pub mod revalidator;
pub mod scope;
pub mod security;

pub use ctx::{ExecutionCtx, TokioExecutionCtx};
pub use options::IsrEngineBuilder;
pub use render::{Render, RenderOutcome, RenderRequest};
pub use revalidator::Revalidator;
pub use scope::RequestScope;

use bytes::Bytes;
use isr_cache::{key::lock_key, key::page_key, CacheLayer, CompiledRoutes, SharedLockProvider, SharedTagIndex};
use isr_core::{CacheEntry, CacheStatus, IsrConfig, IsrStatus, RenderResult, Result, RevalidateValue, RouteConfig};
use std::sync::Arc;

use entry::build_cache_entry;
use render::to_render_result;

type CacheKeyFn = dyn Fn(&http::Uri) -> String + Send + Sync;
type ShouldCacheStatusFn = dyn Fn(u16) -> bool + Send + Sync;

/// The wired-up ISR engine: route table, two-tier cache, tag index, lock
/// provider, render callback, and the security/scope machinery around them.
/// Built with [`IsrEngineBuilder`] (`IsrEngine::builder(config)`).
pub struct IsrEngine {
    config: Arc<IsrConfig>,
    cache: Arc<dyn CacheLayer>,
    tag_index: SharedTagIndex,
    lock: SharedLockProvider,
    routes: CompiledRoutes,
    renderer: Arc<dyn Render>,
    revalidator: Arc<Revalidator>,
    nonce: Arc<String>,
    cache_key_fn: Arc<CacheKeyFn>,
    should_cache_status: Arc<ShouldCacheStatusFn>,
    header_allowlist: Vec<String>,
}

impl IsrEngine {
    pub fn builder(config: IsrConfig) -> IsrEngineBuilder {
        IsrEngineBuilder::new(config)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        config: IsrConfig,
        routes: CompiledRoutes,
        cache: Arc<dyn CacheLayer>,
        tag_index: SharedTagIndex,
        lock: SharedLockProvider,
        renderer: Arc<dyn Render>,
        cache_key_fn: Option<Arc<CacheKeyFn>>,
        should_cache_status: Option<Arc<ShouldCacheStatusFn>>,
        header_allowlist: Vec<String>,
    ) -> Self {
        let config = Arc::new(config);
        let nonce = Arc::new(security::generate_nonce());
        let revalidator = Arc::new(Revalidator::with_header_allowlist(
            cache.clone(),
            tag_index.clone(),
            lock.clone(),
            renderer.clone(),
            config.clone(),
            (*nonce).clone(),
            header_allowlist.clone(),
        ));

        Self {
            config,
            cache,
            tag_index,
            lock,
            routes,
            renderer,
            revalidator,
            nonce,
            cache_key_fn: cache_key_fn.unwrap_or_else(|| Arc::new(|uri: &http::Uri| uri.path().to_string())),
            should_cache_status: should_cache_status
                .unwrap_or_else(|| Arc::new(|status: u16| status < 500 && status != 204)),
            header_allowlist,
        }
    }

    /// This instance's recursion-guard nonce: random, not a fixed sentinel,
    /// so an external caller can't spoof the self-fetch detection header.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Purges a single path without re-rendering (§4.6 `revalidatePath`).
    pub async fn revalidate_path(&self, path: &str) {
        self.revalidator.revalidate_path(path).await;
    }

    /// Bounded-concurrency purge of every key carrying `tag` (§4.6
    /// `revalidateTag`).
    pub async fn revalidate_tag(&self, tag: &str) {
        self.revalidator.revalidate_tag(tag).await;
    }

    /// A per-request config scope (C8, §4.8) seeded with whatever
    /// `RouteConfig` the route table resolves for `request`, if given.
    pub fn scope(&self, request: Option<&http::Request<Bytes>>) -> RequestScope<'_> {
        let route_match = request.and_then(|r| self.match_route_config(r.uri().path()));
        RequestScope::new(self, route_match)
    }

    fn match_route_config(&self, path: &str) -> Option<RouteConfig> {
        self.routes.match_route(path).map(|m| m.config.clone())
    }

    fn carries_recursion_nonce(&self, request: &http::Request<Bytes>) -> bool {
        request
            .headers()
            .get(security::RECURSION_NONCE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| security::constant_time_eq(v.as_bytes(), self.nonce.as_bytes()))
            .unwrap_or(false)
    }

    fn bypass_valid(&self, request: &http::Request<Bytes>) -> bool {
        let Some(token) = &self.config.bypass_token else {
            return false;
        };

        let header_match = request
            .headers()
            .get(security::BYPASS_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| security::constant_time_eq(v.as_bytes(), token.as_bytes()))
            .unwrap_or(false);
        if header_match {
            return true;
        }

        extract_cookie(request.headers(), security::BYPASS_COOKIE)
            .map(|v| security::constant_time_eq(v.as_bytes(), token.as_bytes()))
            .unwrap_or(false)
    }

    fn cache_key(&self, request: &http::Request<Bytes>) -> String {
        (self.cache_key_fn)(request.uri())
    }

    async fn invoke_render(
        &self,
        mut request: http::Request<Bytes>,
        timeout: std::time::Duration,
    ) -> Result<RenderResult> {
        security::prepare_render_request(&mut request, &self.nonce, &self.header_allowlist);
        match tokio::time::timeout(timeout, self.renderer.render(request)).await {
            Ok(Ok(outcome)) => Ok(to_render_result(outcome)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(isr_core::Error::RenderTimeout(timeout)),
        }
    }

    /// Resolves `route_config`/`route_config_override` the same way for
    /// every entry point: route-table match as the lowest-precedence layer,
    /// the caller-supplied override as the highest (§4.8).
    fn resolve_route_config(&self, path: &str, route_config_override: Option<RouteConfig>) -> Option<RouteConfig> {
        let mut scope = RequestScope::new(self, self.match_route_config(path));
        if let Some(cfg) = route_config_override {
            scope.set(cfg);
        }
        scope.resolve_config()
    }

    /// Unified entry point (§4.7): looks up, renders on MISS, and caches the
    /// result. Returns `Ok(None)` for requests the engine declines to
    /// handle (non-GET/HEAD, its own recursive self-fetch, no route match,
    /// or a busy lock on MISS) — the framework renders those itself.
    /// `Err` only ever originates from a foreground render failure/timeout.
    pub async fn handle_request(
        &self,
        request: http::Request<Bytes>,
        ctx: &dyn ExecutionCtx,
        route_config_override: Option<RouteConfig>,
    ) -> Result<Option<http::Response<Bytes>>> {
        let method = request.method();
        if method != http::Method::GET && method != http::Method::HEAD {
            return Ok(None);
        }
        if self.carries_recursion_nonce(&request) {
            return Ok(None);
        }

        let path = request.uri().path().to_string();
        if !self.routes.is_empty() && self.match_route_config(&path).is_none() {
            return Ok(None);
        }
        let route_config = self.resolve_route_config(&path, route_config_override);

        let key = self.cache_key(&request);
        let storage_key = page_key(&key, self.config.storage_key_budget);

        if self.bypass_valid(&request) {
            let result = self.invoke_render(request, self.config.render_timeout).await?;
            return Ok(Some(self.build_fresh_response(IsrStatus::Bypass, result, response::NO_STORE.to_string())));
        }

        let route_revalidate = route_config.as_ref().and_then(|c| c.revalidate);
        if matches!(route_revalidate, Some(RevalidateValue::NoStore)) {
            let result = self.invoke_render(request, self.config.render_timeout).await?;
            self.schedule_delete(ctx, storage_key.clone());
            return Ok(Some(self.build_fresh_response(IsrStatus::Skip, result, response::NO_STORE.to_string())));
        }

        let (entry, status) = self.cache.get(&storage_key).await?;

        match status {
            CacheStatus::Hit => {
                let entry = entry.expect("CacheStatus::Hit always carries an entry");
                Ok(Some(self.build_cached_response(IsrStatus::Hit, entry)))
            }
            CacheStatus::Stale => {
                let entry = entry.expect("CacheStatus::Stale always carries an entry");
                let forever = route_config
                    .as_ref()
                    .map(|c| matches!(c.revalidate, Some(RevalidateValue::Forever)))
                    .unwrap_or(false);
                if forever {
                    return Ok(Some(self.build_cached_response(IsrStatus::Hit, entry)));
                }

                self.schedule_revalidate(ctx, &key, &request, route_config, &entry);
                Ok(Some(self.build_cached_response(IsrStatus::Stale, entry)))
            }
            CacheStatus::Miss => {
                let lock_handle = if self.config.lock_on_miss {
                    let lock_name = lock_key(&key, self.config.storage_key_budget);
                    match self.lock.acquire(&lock_name, self.config.lock_ttl).await {
                        Ok(Some(handle)) => Some(handle),
                        Ok(None) => return Ok(None),
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "lock acquire failed on MISS, proceeding without lock");
                            None
                        }
                    }
                } else {
                    None
                };

                let render_result = self.invoke_render(request, self.config.render_timeout).await?;

                let revalidate = render_result
                    .revalidate
                    .or_else(|| route_config.as_ref().and_then(|c| c.revalidate))
                    .unwrap_or(self.config.default_revalidate);

                if revalidate.is_no_store() {
                    drop(lock_handle);
                    self.schedule_delete(ctx, storage_key);
                    return Ok(Some(self.build_fresh_response(IsrStatus::Skip, render_result, response::NO_STORE.to_string())));
                }

                if !(self.should_cache_status)(render_result.status) {
                    drop(lock_handle);
                    return Ok(Some(self.build_fresh_response(IsrStatus::Miss, render_result, response::NO_STORE.to_string())));
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

                self.schedule_put(ctx, storage_key, entry.clone(), lock_handle);

                Ok(Some(self.build_cached_response(IsrStatus::Miss, entry)))
            }
        }
    }

    /// Split-lifecycle lookup (§4.7): HIT/STALE/MISS classification only —
    /// the framework owns rendering. STALE still triggers background
    /// revalidation. The returned response always carries a non-shareable
    /// `Cache-Control` so an upstream CDN never caches it.
    pub async fn lookup(
        &self,
        request: http::Request<Bytes>,
        ctx: &dyn ExecutionCtx,
        route_config_override: Option<RouteConfig>,
    ) -> Option<http::Response<Bytes>> {
        let method = request.method();
        if method != http::Method::GET && method != http::Method::HEAD {
            return None;
        }
        if self.carries_recursion_nonce(&request) {
            return None;
        }

        let path = request.uri().path().to_string();
        if !self.routes.is_empty() && self.match_route_config(&path).is_none() {
            return None;
        }
        let route_config = self.resolve_route_config(&path, route_config_override);

        let key = self.cache_key(&request);
        let storage_key = page_key(&key, self.config.storage_key_budget);

        let (entry, status) = self.cache.get(&storage_key).await.ok()?;

        match status {
            CacheStatus::Hit => entry.map(|e| self.build_split_lifecycle_response(IsrStatus::Hit, e)),
            CacheStatus::Stale => {
                let entry = entry?;
                let forever = route_config
                    .as_ref()
                    .map(|c| matches!(c.revalidate, Some(RevalidateValue::Forever)))
                    .unwrap_or(false);
                if !forever {
                    self.schedule_revalidate(ctx, &key, &request, route_config, &entry);
                }
                Some(self.build_split_lifecycle_response(IsrStatus::Stale, entry))
            }
            CacheStatus::Miss => None,
        }
    }

    /// Split-lifecycle store (§4.7 steps 6-8): caches a framework-produced
    /// render result, honoring the same no-store/uncacheable-status rules
    /// as the MISS branch of [`Self::handle_request`].
    pub async fn cache(
        &self,
        request: &http::Request<Bytes>,
        render_result: RenderResult,
        route_config: Option<RouteConfig>,
        ctx: &dyn ExecutionCtx,
    ) -> http::Response<Bytes> {
        let key = self.cache_key(request);
        let storage_key = page_key(&key, self.config.storage_key_budget);

        let revalidate = render_result
            .revalidate
            .or_else(|| route_config.as_ref().and_then(|c| c.revalidate))
            .unwrap_or(self.config.default_revalidate);

        if revalidate.is_no_store() {
            self.schedule_delete(ctx, storage_key);
            return self.build_fresh_response(IsrStatus::Skip, render_result, response::NO_STORE.to_string());
        }

        if !(self.should_cache_status)(render_result.status) {
            return self.build_fresh_response(IsrStatus::Miss, render_result, response::NO_STORE.to_string());
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

        self.schedule_put(ctx, storage_key, entry.clone(), None);

        self.build_split_lifecycle_response(IsrStatus::Miss, entry)
    }

    fn schedule_delete(&self, ctx: &dyn ExecutionCtx, storage_key: String) {
        let cache = self.cache.clone();
        ctx.schedule_background(Box::pin(async move {
            if let Err(e) = cache.delete(&storage_key).await {
                tracing::warn!(storage_key, error = %e, "background delete failed");
            }
        }));
    }

    fn schedule_put(
        &self,
        ctx: &dyn ExecutionCtx,
        storage_key: String,
        entry: CacheEntry,
        lock_handle: Option<isr_cache::LockHandle>,
    ) {
        let cache = self.cache.clone();
        let tag_index = self.tag_index.clone();
        let tags_for_index = entry.metadata.tags.clone();
        ctx.schedule_background(Box::pin(async move {
            let _lock_handle = lock_handle;
            let (cache_result, index_result) = tokio::join!(
                cache.put(&storage_key, entry),
                tag_index.add_key_to_tags(&tags_for_index, &storage_key)
            );
            if let Err(e) = cache_result {
                tracing::warn!(storage_key, error = %e, "background cache put failed");
            }
            if let Err(e) = index_result {
                tracing::warn!(storage_key, error = %e, "background tag index update failed, cache write preserved");
            }
        }));
    }

    fn schedule_revalidate(
        &self,
        ctx: &dyn ExecutionCtx,
        key: &str,
        request: &http::Request<Bytes>,
        route_config: Option<RouteConfig>,
        entry: &CacheEntry,
    ) {
        let revalidator = self.revalidator.clone();
        let key_owned = key.to_string();
        let request_for_bg = clone_request(request);
        let route_config_for_bg = route_config.or_else(|| Some(route_config_from_entry(entry)));
        ctx.schedule_background(Box::pin(async move {
            revalidator.revalidate(&key_owned, request_for_bg, route_config_for_bg).await;
        }));
    }

    fn build_cached_response(&self, status: IsrStatus, entry: CacheEntry) -> http::Response<Bytes> {
        let cache_control = response::cache_control_for_metadata(&entry.metadata);
        self.assemble_response(
            status,
            entry.metadata.status,
            entry.body,
            entry.headers,
            cache_control,
            Some(entry.metadata.created_at),
        )
    }

    fn build_split_lifecycle_response(&self, status: IsrStatus, entry: CacheEntry) -> http::Response<Bytes> {
        self.assemble_response(
            status,
            entry.metadata.status,
            entry.body,
            entry.headers,
            response::PRIVATE_NO_CACHE.to_string(),
            Some(entry.metadata.created_at),
        )
    }

    fn build_fresh_response(&self, status: IsrStatus, render: RenderResult, cache_control: String) -> http::Response<Bytes> {
        self.assemble_response(status, render.status, render.body, render.headers, cache_control, None)
    }

    fn assemble_response(
        &self,
        status: IsrStatus,
        http_status: u16,
        body: Bytes,
        mut headers: isr_core::HeaderMap,
        cache_control: String,
        cache_date_millis: Option<i64>,
    ) -> http::Response<Bytes> {
        security::strip_forbidden_response_header_map(&mut headers);

        if headers.keys().any(|k| k.eq_ignore_ascii_case("cache-control")) {
            tracing::warn!("render callback set Cache-Control; the engine overrides it authoritatively");
        }

        let status_code =
            http::StatusCode::from_u16(http_status).unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
        let mut builder = http::Response::builder().status(status_code);

        if let Some(response_headers) = builder.headers_mut() {
            for (name, value) in &headers {
                if name.eq_ignore_ascii_case("cache-control") {
                    continue;
                }
                let Ok(header_name) = http::HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) else {
                    continue;
                };
                if let Some(header_value) = security::sanitize_header_value(name, value) {
                    response_headers.insert(header_name, header_value);
                }
            }

            if self.config.expose_headers {
                if let Ok(v) = http::HeaderValue::from_str(response::status_header_value(status)) {
                    response_headers.insert(http::HeaderName::from_static(response::ISR_STATUS_HEADER), v);
                }
                if let Some(millis) = cache_date_millis {
                    let date = response::http_date(millis);
                    if let Ok(v) = http::HeaderValue::from_str(&date) {
                        response_headers.insert(http::HeaderName::from_static(response::ISR_CACHE_DATE_HEADER), v);
                    }
                }
            }

            if let Ok(v) = http::HeaderValue::from_str(&cache_control) {
                response_headers.insert(http::header::CACHE_CONTROL, v);
            }
        }

        builder.body(body).unwrap_or_else(|_| http::Response::new(Bytes::new()))
    }
}

fn clone_request(request: &http::Request<Bytes>) -> http::Request<Bytes> {
    let mut builder = http::Request::builder()
        .method(request.method().clone())
        .uri(request.uri().clone())
        .version(request.version());
    for (name, value) in request.headers().iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(request.body().clone())
        .expect("cloning a well-formed request cannot fail")
}

/// Reconstructs a minimal `RouteConfig` from a stored entry's own TTL and
/// tags, used as the fallback when neither the route table nor a
/// per-request override contributed a config for background revalidation.
fn route_config_from_entry(entry: &CacheEntry) -> RouteConfig {
    let revalidate = match entry.metadata.revalidate_after {
        None => RevalidateValue::Forever,
        Some(revalidate_after) => {
            let ttl_seconds = ((revalidate_after - entry.metadata.created_at) as f64 / 1000.0).max(0.0);
            RevalidateValue::Ttl(ttl_seconds)
        }
    };
    RouteConfig::new()
        .with_revalidate(revalidate)
        .with_tags(entry.metadata.tags.clone())
}

fn extract_cookie(headers: &http::HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(http::header::COOKIE)?.to_str().ok()?;
    cookie_header.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k.trim() == name).then(|| v.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderOutcome;
    use async_trait::async_trait;
    use isr_core::RouteTable;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRenderer {
        calls: Arc<AtomicUsize>,
        body: &'static str,
    }

    #[async_trait]
    impl Render for CountingRenderer {
        async fn render(&self, _request: RenderRequest) -> Result<RenderOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RenderOutcome::Result(RenderResult::new(Bytes::from_static(self.body.as_bytes()), 200)))
        }
    }

    fn get(path: &str) -> http::Request<Bytes> {
        http::Request::builder()
            .method(http::Method::GET)
            .uri(path)
            .body(Bytes::new())
            .unwrap()
    }

    fn engine(renderer: CountingRenderer, config: IsrConfig) -> IsrEngine {
        IsrEngine::builder(config)
            .renderer(Arc::new(renderer))
            .with_cache_name("test")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn first_miss_then_hit_renders_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let eng = engine(CountingRenderer { calls: calls.clone(), body: "A" }, IsrConfig::default());
        let ctx = TokioExecutionCtx::new();

        let first = eng.handle_request(get("/"), &ctx, None).await.unwrap().unwrap();
        assert_eq!(first.headers().get("x-isr-status").unwrap(), "MISS");
        assert_eq!(first.body(), &Bytes::from_static(b"A"));

        ctx.drain().await;

        let second = eng.handle_request(get("/"), &ctx, None).await.unwrap().unwrap();
        assert_eq!(second.headers().get("x-isr-status").unwrap(), "HIT");
        assert_eq!(second.body(), &Bytes::from_static(b"A"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recursion_nonce_header_is_declined() {
        let calls = Arc::new(AtomicUsize::new(0));
        let eng = engine(CountingRenderer { calls, body: "A" }, IsrConfig::default());
        let ctx = TokioExecutionCtx::new();

        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri("/")
            .header(security::RECURSION_NONCE_HEADER, eng.nonce())
            .body(Bytes::new())
            .unwrap();

        let result = eng.handle_request(request, &ctx, None).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn wrong_nonce_value_is_processed_normally() {
        let calls = Arc::new(AtomicUsize::new(0));
        let eng = engine(CountingRenderer { calls: calls.clone(), body: "A" }, IsrConfig::default());
        let ctx = TokioExecutionCtx::new();

        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri("/")
            .header(security::RECURSION_NONCE_HEADER, "not-the-real-nonce")
            .body(Bytes::new())
            .unwrap();

        let result = eng.handle_request(request, &ctx, None).await.unwrap();
        assert!(result.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn post_request_is_declined() {
        let calls = Arc::new(AtomicUsize::new(0));
        let eng = engine(CountingRenderer { calls, body: "A" }, IsrConfig::default());
        let ctx = TokioExecutionCtx::new();
        let request = http::Request::builder().method(http::Method::POST).uri("/").body(Bytes::new()).unwrap();
        assert!(eng.handle_request(request, &ctx, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unmatched_route_is_declined_when_routes_configured() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = IsrConfig::default();
        config.routes = RouteTable::new().push("/blog/[slug]", RouteConfig::new());
        let eng = engine(CountingRenderer { calls, body: "A" }, config);
        let ctx = TokioExecutionCtx::new();

        assert!(eng.handle_request(get("/unmatched"), &ctx, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bypass_token_skips_cache_and_sets_no_store() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = IsrConfig::default();
        config.bypass_token = Some("secret".to_string());
        let eng = engine(CountingRenderer { calls: calls.clone(), body: "A" }, config);
        let ctx = TokioExecutionCtx::new();

        let request = http::Request::builder()
            .method(http::Method::GET)
            .uri("/")
            .header(security::BYPASS_HEADER, "secret")
            .body(Bytes::new())
            .unwrap();

        let response = eng.handle_request(request, &ctx, None).await.unwrap().unwrap();
        assert_eq!(response.headers().get("x-isr-status").unwrap(), "BYPASS");
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-store");

        ctx.drain().await;
        let next = eng.handle_request(get("/"), &ctx, None).await.unwrap().unwrap();
        assert_eq!(next.headers().get("x-isr-status").unwrap(), "MISS");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn route_revalidate_zero_skips_caching_every_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = IsrConfig::default();
        config.routes = RouteTable::new().push("/x", RouteConfig::new().with_revalidate(RevalidateValue::NoStore));
        let eng = engine(CountingRenderer { calls: calls.clone(), body: "C" }, config);
        let ctx = TokioExecutionCtx::new();

        let first = eng.handle_request(get("/x"), &ctx, None).await.unwrap().unwrap();
        assert_eq!(first.headers().get("x-isr-status").unwrap(), "SKIP");
        ctx.drain().await;
        let second = eng.handle_request(get("/x"), &ctx, None).await.unwrap().unwrap();
        assert_eq!(second.headers().get("x-isr-status").unwrap(), "SKIP");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn server_error_status_is_never_cached() {
        struct ErrorRenderer(Arc<AtomicUsize>);
        #[async_trait]
        impl Render for ErrorRenderer {
            async fn render(&self, _request: RenderRequest) -> Result<RenderOutcome> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(RenderOutcome::Result(RenderResult::new(Bytes::from_static(b"err"), 500)))
            }
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let eng = IsrEngine::builder(IsrConfig::default())
            .renderer(Arc::new(ErrorRenderer(calls.clone())))
            .with_cache_name("test")
            .build()
            .unwrap();
        let ctx = TokioExecutionCtx::new();

        for _ in 0..2 {
            let response = eng.handle_request(get("/x"), &ctx, None).await.unwrap().unwrap();
            assert_eq!(response.status(), 500);
            assert_eq!(response.headers().get("x-isr-status").unwrap(), "MISS");
        }
        ctx.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn render_headers_never_leak_set_cookie() {
        struct CookieRenderer;
        #[async_trait]
        impl Render for CookieRenderer {
            async fn render(&self, _request: RenderRequest) -> Result<RenderOutcome> {
                let mut result = RenderResult::new(Bytes::from_static(b"A"), 200);
                result.headers.insert("set-cookie".to_string(), "s=1".to_string());
                result.headers.insert("x-safe".to_string(), "ok".to_string());
                Ok(RenderOutcome::Result(result))
            }
        }
        let eng = IsrEngine::builder(IsrConfig::default())
            .renderer(Arc::new(CookieRenderer))
            .with_cache_name("test")
            .build()
            .unwrap();
        let ctx = TokioExecutionCtx::new();

        let response = eng.handle_request(get("/"), &ctx, None).await.unwrap().unwrap();
        assert!(response.headers().get("set-cookie").is_none());
        assert_eq!(response.headers().get("x-safe").unwrap(), "ok");

        ctx.drain().await;
        let cached = eng.handle_request(get("/"), &ctx, None).await.unwrap().unwrap();
        assert!(cached.headers().get("set-cookie").is_none());
    }

    #[tokio::test]
    async fn stale_entry_serves_immediately_and_revalidates_in_background() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = IsrConfig::default();
        config.routes = RouteTable::new().push("/x", RouteConfig::new().with_revalidate(RevalidateValue::Ttl(0.001)));
        let eng = engine(CountingRenderer { calls: calls.clone(), body: "OLD" }, config);
        let ctx = TokioExecutionCtx::new();

        let first = eng.handle_request(get("/x"), &ctx, None).await.unwrap().unwrap();
        assert_eq!(first.headers().get("x-isr-status").unwrap(), "MISS");
        ctx.drain().await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let second = eng.handle_request(get("/x"), &ctx, None).await.unwrap().unwrap();
        assert_eq!(second.headers().get("x-isr-status").unwrap(), "STALE");
        assert_eq!(second.body(), &Bytes::from_static(b"OLD"));

        ctx.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lookup_never_renders_and_returns_private_no_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let eng = engine(CountingRenderer { calls: calls.clone(), body: "A" }, IsrConfig::default());
        let ctx = TokioExecutionCtx::new();

        assert!(eng.lookup(get("/"), &ctx, None).await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let render_result = RenderResult::new(Bytes::from_static(b"A"), 200);
        let cached = eng.cache(&get("/"), render_result, None, &ctx).await;
        assert_eq!(cached.headers().get("x-isr-status").unwrap(), "MISS");
        ctx.drain().await;

        let looked_up = eng.lookup(get("/"), &ctx, None).await.unwrap();
        assert_eq!(looked_up.headers().get("x-isr-status").unwrap(), "HIT");
        assert_eq!(looked_up.headers().get("cache-control").unwrap(), "private, no-cache");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn forever_route_serves_hit_instead_of_stale() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut config = IsrConfig::default();
        config.routes = RouteTable::new().push("/x", RouteConfig::new().with_revalidate(RevalidateValue::Ttl(0.001)));
        let eng = engine(CountingRenderer { calls: calls.clone(), body: "A" }, config);
        let ctx = TokioExecutionCtx::new();

        eng.handle_request(get("/x"), &ctx, None).await.unwrap();
        ctx.drain().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let forever_override = RouteConfig::new().with_revalidate(RevalidateValue::Forever);
        let response = eng
            .handle_request(get("/x"), &ctx, Some(forever_override))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.headers().get("x-isr-status").unwrap(), "HIT");
        ctx.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn extract_cookie_finds_named_value_among_several() {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::COOKIE, "a=1; __isr_bypass=secret; b=2".parse().unwrap());
        assert_eq!(extract_cookie(&headers, "__isr_bypass"), Some("secret".to_string()));
        assert_eq!(extract_cookie(&headers, "missing"), None);
    }
}
