//! Per-request config scope (C8, spec §4.8): lets layout/shared handlers
//! and page/leaf handlers contribute ISR config independently, merged at
//! `resolve_config` time in order of increasing precedence. Also exposes
//! the engine's own `lookup`/`cache`/`revalidate_path`/`revalidate_tag` so a
//! handler can drive the whole request lifecycle through the scope alone,
//! without holding a separate `&IsrEngine` reference (§4.8).

use crate::ctx::ExecutionCtx;
use crate::IsrEngine;
use bytes::Bytes;
use isr_core::{RenderResult, RouteConfig};
use std::collections::HashSet;

pub struct RequestScope<'a> {
    engine: &'a IsrEngine,
    global_match: Option<RouteConfig>,
    defaults: Option<RouteConfig>,
    set: Option<RouteConfig>,
}

impl<'a> RequestScope<'a> {
    /// `global_match` is the `RouteConfig` the route table resolved for this
    /// request, if any — the lowest-precedence layer.
    pub fn new(engine: &'a IsrEngine, global_match: Option<RouteConfig>) -> Self {
        Self {
            engine,
            global_match,
            defaults: None,
            set: None,
        }
    }

    /// Contributed by layout/shared handlers. Multiple calls merge, with
    /// later calls taking precedence within this layer.
    pub fn defaults(&mut self, config: RouteConfig) {
        self.defaults = Some(merge_layer(self.defaults.take(), config));
    }

    /// Contributed by page/leaf handlers. Highest-precedence layer.
    pub fn set(&mut self, config: RouteConfig) {
        self.set = Some(merge_layer(self.set.take(), config));
    }

    /// Merges `(global_match, defaults, set)` in that precedence order:
    /// `revalidate` takes the highest-precedence non-`None` value; `tags`
    /// is the deduplicated union across every contributing layer. Returns
    /// `None` if no layer contributed anything.
    pub fn resolve_config(&self) -> Option<RouteConfig> {
        let layers = [&self.global_match, &self.defaults, &self.set];

        let mut contributed = false;
        let mut revalidate = None;
        let mut tags = Vec::new();
        let mut seen = HashSet::new();

        for layer in layers.into_iter().flatten() {
            contributed = true;
            if layer.revalidate.is_some() {
                revalidate = layer.revalidate;
            }
            if let Some(layer_tags) = &layer.tags {
                for tag in layer_tags {
                    if seen.insert(tag.clone()) {
                        tags.push(tag.clone());
                    }
                }
            }
        }

        if !contributed {
            return None;
        }

        Some(RouteConfig {
            revalidate,
            tags: if tags.is_empty() { None } else { Some(tags) },
        })
    }

    /// Split-lifecycle lookup (§4.7) against this scope's resolved config,
    /// so a layout/page handler never has to thread a separate engine
    /// reference through to call it.
    pub async fn lookup(&self, request: http::Request<Bytes>, ctx: &dyn ExecutionCtx) -> Option<http::Response<Bytes>> {
        self.engine.lookup(request, ctx, self.resolve_config()).await
    }

    /// Split-lifecycle store (§4.7) against this scope's resolved config.
    pub async fn cache(
        &self,
        request: &http::Request<Bytes>,
        render_result: RenderResult,
        ctx: &dyn ExecutionCtx,
    ) -> http::Response<Bytes> {
        self.engine.cache(request, render_result, self.resolve_config(), ctx).await
    }

    /// Delegates to [`IsrEngine::revalidate_path`] (§4.6).
    pub async fn revalidate_path(&self, path: &str) {
        self.engine.revalidate_path(path).await;
    }

    /// Delegates to [`IsrEngine::revalidate_tag`] (§4.6).
    pub async fn revalidate_tag(&self, tag: &str) {
        self.engine.revalidate_tag(tag).await;
    }
}

fn merge_layer(existing: Option<RouteConfig>, incoming: RouteConfig) -> RouteConfig {
    let Some(mut base) = existing else {
        return incoming;
    };
    if incoming.revalidate.is_some() {
        base.revalidate = incoming.revalidate;
    }
    if let Some(tags) = incoming.tags {
        let merged = base.tags.get_or_insert_with(Vec::new);
        merged.extend(tags);
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{Render, RenderOutcome, RenderRequest};
    use crate::IsrEngine;
    use async_trait::async_trait;
    use isr_core::{IsrConfig, RevalidateValue};

    struct StubRenderer;
    #[async_trait]
    impl Render for StubRenderer {
        async fn render(&self, _request: RenderRequest) -> isr_core::Result<RenderOutcome> {
            Ok(RenderOutcome::Result(RenderResult::new(Bytes::from_static(b"A"), 200)))
        }
    }

    fn engine() -> IsrEngine {
        IsrEngine::builder(IsrConfig::default())
            .renderer(std::sync::Arc::new(StubRenderer))
            .with_cache_name("scope-test")
            .build()
            .unwrap()
    }

    #[test]
    fn no_contribution_resolves_to_none() {
        let eng = engine();
        let scope = RequestScope::new(&eng, None);
        assert!(scope.resolve_config().is_none());
    }

    #[test]
    fn set_takes_precedence_over_defaults_and_global_match() {
        let eng = engine();
        let mut scope = RequestScope::new(
            &eng,
            Some(RouteConfig::new().with_revalidate(RevalidateValue::Ttl(10.0))),
        );
        scope.defaults(RouteConfig::new().with_revalidate(RevalidateValue::Ttl(20.0)));
        scope.set(RouteConfig::new().with_revalidate(RevalidateValue::Ttl(30.0)));

        let resolved = scope.resolve_config().unwrap();
        assert_eq!(resolved.revalidate, Some(RevalidateValue::Ttl(30.0)));
    }

    #[test]
    fn lower_layer_revalidate_used_when_higher_layers_silent() {
        let eng = engine();
        let mut scope = RequestScope::new(
            &eng,
            Some(RouteConfig::new().with_revalidate(RevalidateValue::Ttl(10.0))),
        );
        scope.defaults(RouteConfig::new().with_tags(vec!["blog".to_string()]));

        let resolved = scope.resolve_config().unwrap();
        assert_eq!(resolved.revalidate, Some(RevalidateValue::Ttl(10.0)));
    }

    #[test]
    fn tags_are_unioned_and_deduplicated_across_layers() {
        let eng = engine();
        let mut scope = RequestScope::new(
            &eng,
            Some(RouteConfig::new().with_tags(vec!["a".to_string(), "b".to_string()])),
        );
        scope.defaults(RouteConfig::new().with_tags(vec!["b".to_string(), "c".to_string()]));
        scope.set(RouteConfig::new().with_tags(vec!["d".to_string()]));

        let resolved = scope.resolve_config().unwrap();
        assert_eq!(
            resolved.tags,
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()])
        );
    }

    #[tokio::test]
    async fn scope_cache_and_lookup_delegate_to_the_engine() {
        let eng = engine();
        let ctx = crate::ctx::TokioExecutionCtx::new();
        let scope = RequestScope::new(&eng, None);

        let request = http::Request::builder().uri("/x").body(Bytes::new()).unwrap();
        let render_result = RenderResult::new(Bytes::from_static(b"A"), 200);
        let cached = scope.cache(&request, render_result, &ctx).await;
        assert_eq!(cached.headers().get("x-isr-status").unwrap(), "MISS");
        ctx.drain().await;

        let request = http::Request::builder().uri("/x").body(Bytes::new()).unwrap();
        let looked_up = scope.lookup(request, &ctx).await.unwrap();
        assert_eq!(looked_up.headers().get("x-isr-status").unwrap(), "HIT");
    }

    #[tokio::test]
    async fn scope_revalidate_path_delegates_to_the_engine() {
        let eng = engine();
        let ctx = crate::ctx::TokioExecutionCtx::new();
        let scope = RequestScope::new(&eng, None);

        let request = http::Request::builder().uri("/x").body(Bytes::new()).unwrap();
        let render_result = RenderResult::new(Bytes::from_static(b"A"), 200);
        scope.cache(&request, render_result, &ctx).await;
        ctx.drain().await;

        scope.revalidate_path("/x").await;

        let request = http::Request::builder().uri("/x").body(Bytes::new()).unwrap();
        assert!(scope.lookup(request, &ctx).await.is_none());
    }
}
