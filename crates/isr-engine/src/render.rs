//! The render callback contract consumed by the engine (spec §6): a caller
//! supplies either a `RenderResult` directly or a raw `http::Response`,
//! which the engine normalizes via [`to_render_result`].

use async_trait::async_trait;
use bytes::Bytes;
use isr_core::{HeaderMap, RenderResult, Result};
use std::future::Future;

pub type RenderRequest = http::Request<Bytes>;

/// What a render callback hands back. A framework that already builds its
/// own `http::Response` doesn't need to learn `RenderResult`'s shape.
pub enum RenderOutcome {
    Result(RenderResult),
    Response(http::Response<Bytes>),
}

#[async_trait]
pub trait Render: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<RenderOutcome>;
}

#[async_trait]
impl<F, Fut> Render for F
where
    F: Fn(RenderRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RenderOutcome>> + Send,
{
    async fn render(&self, request: RenderRequest) -> Result<RenderOutcome> {
        (self)(request).await
    }
}

/// Normalizes a render callback's outcome into a `RenderResult`, converting
/// a raw `http::Response` by flattening its header map into the engine's
/// string-keyed representation.
pub fn to_render_result(outcome: RenderOutcome) -> RenderResult {
    match outcome {
        RenderOutcome::Result(result) => result,
        RenderOutcome::Response(response) => {
            let status = response.status().as_u16();
            let (parts, body) = response.into_parts();
            let mut headers = HeaderMap::new();
            for (name, value) in parts.headers.iter() {
                if let Ok(v) = value.to_str() {
                    headers.insert(name.as_str().to_string(), v.to_string());
                }
            }
            RenderResult {
                body,
                status,
                headers,
                tags: None,
                revalidate: None,
            }
        }
    }
}
