//! Security-hardened primitives (C9, spec §4.7/§4.11): recursion nonce,
//! sensitive request-header stripping, shared-cache-forbidden response
//! headers, Host validation, and constant-time comparison.

use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;

/// Fixed name of the header the engine uses to detect its own self-fetch
/// render requests. The nonce value, not the header name, is the secret.
pub const RECURSION_NONCE_HEADER: &str = "x-isr-rendering";
pub const BYPASS_HEADER: &str = "x-isr-bypass";
pub const BYPASS_COOKIE: &str = "__isr_bypass";

const SENSITIVE_REQUEST_HEADERS: &[&str] = &["cookie", "authorization", "proxy-authorization"];
const FORBIDDEN_RESPONSE_HEADERS: &[&str] = &["set-cookie", "www-authenticate", "proxy-authenticate"];

static HOST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._\-]+(:\d{1,5})?$").unwrap());

/// A random per-instance value, not a fixed sentinel (§9): a fixed value is
/// trivially spoofable by an external caller, closing off a header-spoofing
/// cache-bypass class of bug.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Strips `Cookie`, `Authorization`, `Proxy-Authorization`, and the bypass
/// header from a request before handing it to the render callback, unless
/// explicitly allowlisted. Forwarding credentials into a render would cause
/// user-specific content to be cached and served to everyone.
pub fn strip_sensitive_request_headers(headers: &mut http::HeaderMap, allowlist: &[String]) {
    let sensitive = SENSITIVE_REQUEST_HEADERS
        .iter()
        .copied()
        .chain(std::iter::once(BYPASS_HEADER));
    for name in sensitive {
        if allowlist.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            continue;
        }
        headers.remove(name);
    }
}

/// Unconditionally removes the headers a shared cache must never replay:
/// they identify a single user.
pub fn strip_forbidden_response_headers(headers: &mut http::HeaderMap) {
    for name in FORBIDDEN_RESPONSE_HEADERS {
        headers.remove(*name);
    }
}

/// Same removal, applied to the engine's string-keyed `HeaderMap` (used on
/// `CacheEntry`/`RenderResult`, where header names may arrive in any case).
pub fn strip_forbidden_response_header_map(headers: &mut isr_core::HeaderMap) {
    let to_remove: Vec<String> = headers
        .keys()
        .filter(|k| FORBIDDEN_RESPONSE_HEADERS.iter().any(|f| k.eq_ignore_ascii_case(f)))
        .cloned()
        .collect();
    for key in to_remove {
        headers.remove(&key);
    }
}

/// Validates a header value the way the engine must before writing it out:
/// values that would fail `http::HeaderValue` construction (CRLF injection,
/// stray control bytes) are dropped rather than propagated.
pub fn sanitize_header_value(name: &str, value: &str) -> Option<http::HeaderValue> {
    match http::HeaderValue::from_str(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(name, error = %e, "dropping header with invalid value");
            None
        }
    }
}

/// Prepares a request for handoff to the render callback: strips sensitive
/// request headers (unless allowlisted) and injects the recursion-guard
/// header carrying this instance's nonce (§4.7). Shared by the foreground
/// pipeline and the background revalidator so neither path can forget one
/// of the two steps.
pub fn prepare_render_request(request: &mut http::Request<bytes::Bytes>, nonce: &str, allowlist: &[String]) {
    strip_sensitive_request_headers(request.headers_mut(), allowlist);
    if let Ok(value) = http::HeaderValue::from_str(nonce) {
        request
            .headers_mut()
            .insert(http::HeaderName::from_static(RECURSION_NONCE_HEADER), value);
    }
}

/// Validates an incoming `Host` header against `^[a-zA-Z0-9._-]+(:\d{1,5})?$`,
/// falling back to `trusted_origin` (and logging) otherwise. Intended for
/// adapters constructing self-fetch URLs from client-supplied `Host`.
pub fn validate_host(host: &str, trusted_origin: &str) -> String {
    if HOST_PATTERN.is_match(host) {
        host.to_string()
    } else {
        tracing::warn!(host, trusted_origin, "invalid Host header, falling back to trusted origin");
        trusted_origin.to_string()
    }
}

/// XOR-accumulator constant-time comparison. A length mismatch still walks
/// the longer input so the comparison's running time doesn't leak the
/// shorter input's length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let max_len = a.len().max(b.len());
    let mut diff: u8 = (a.len() != b.len()) as u8;
    for i in 0..max_len {
        let byte_a = a.get(i).copied().unwrap_or(0);
        let byte_b = b.get(i).copied().unwrap_or(0);
        diff |= byte_a ^ byte_b;
    }
    diff == 0
}
