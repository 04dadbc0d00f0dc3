//! Response construction rules (spec §4.7/§6): the `X-ISR-Status` /
//! `X-ISR-Cache-Date` headers and the `Cache-Control` value the engine
//! computes authoritatively, overriding anything the render callback set.
//!
//! Kept as small, independently-testable functions apart from the pipeline
//! state machine in `lib.rs`, since §4.7's response rules are detailed
//! enough to deserve their own coverage.

use isr_core::{CacheEntryMetadata, IsrStatus, RevalidateValue};

pub const ISR_STATUS_HEADER: &str = "x-isr-status";
pub const ISR_CACHE_DATE_HEADER: &str = "x-isr-cache-date";

pub const NO_STORE: &str = "no-store";
/// Split-lifecycle (`lookup`) responses use this instead of the public
/// shareable form, so an upstream CDN never caches the ISR response itself
/// and every request keeps reaching the worker (§4.7).
pub const PRIVATE_NO_CACHE: &str = "private, no-cache";

/// `Cache-Control` for an entry actually being served from cache (HIT/STALE,
/// or a MISS that was just written).
pub fn cache_control_for_metadata(metadata: &CacheEntryMetadata) -> String {
    match metadata.revalidate_after {
        None => forever_cache_control(),
        Some(revalidate_after) => {
            let ttl_seconds = ttl_seconds(metadata.created_at, revalidate_after);
            ttl_cache_control(ttl_seconds)
        }
    }
}

/// `Cache-Control` computed directly from a resolved `revalidate` value,
/// for callers that haven't built a `CacheEntryMetadata` yet.
pub fn cache_control_for_revalidate(revalidate: RevalidateValue) -> String {
    match revalidate {
        RevalidateValue::Forever => forever_cache_control(),
        RevalidateValue::NoStore => NO_STORE.to_string(),
        RevalidateValue::Ttl(seconds) => ttl_cache_control(seconds.round().max(0.0) as i64),
    }
}

fn forever_cache_control() -> String {
    "public, max-age=0, s-maxage=31536000, immutable".to_string()
}

fn ttl_cache_control(ttl_seconds: i64) -> String {
    format!("public, max-age=0, s-maxage={ttl_seconds}, stale-while-revalidate={ttl_seconds}")
}

fn ttl_seconds(created_at: i64, revalidate_after: i64) -> i64 {
    ((revalidate_after - created_at) as f64 / 1000.0).round().max(0.0) as i64
}

/// Renders `millis` (epoch milliseconds) as an RFC 1123 HTTP date, e.g.
/// `Tue, 15 Nov 1994 08:12:31 GMT`.
pub fn http_date(millis: i64) -> String {
    let secs = millis.div_euclid(1000);
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nanos)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_else(|| "Thu, 01 Jan 1970 00:00:00 GMT".to_string())
}

pub fn status_header_value(status: IsrStatus) -> &'static str {
    status.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forever_metadata_gets_immutable_cache_control() {
        let metadata = CacheEntryMetadata::new(0, None, 200, vec![]);
        assert_eq!(
            cache_control_for_metadata(&metadata),
            "public, max-age=0, s-maxage=31536000, immutable"
        );
    }

    #[test]
    fn ttl_metadata_gets_s_maxage_and_swr() {
        let metadata = CacheEntryMetadata::new(0, Some(60_000), 200, vec![]);
        assert_eq!(
            cache_control_for_metadata(&metadata),
            "public, max-age=0, s-maxage=60, stale-while-revalidate=60"
        );
    }

    #[test]
    fn cache_control_for_revalidate_no_store() {
        assert_eq!(cache_control_for_revalidate(RevalidateValue::NoStore), "no-store");
    }

    #[test]
    fn cache_control_for_revalidate_forever() {
        assert_eq!(
            cache_control_for_revalidate(RevalidateValue::Forever),
            "public, max-age=0, s-maxage=31536000, immutable"
        );
    }

    #[test]
    fn http_date_formats_known_instant() {
        // 2024-01-01T00:00:00Z
        let millis = 1_704_067_200_000;
        assert_eq!(http_date(millis), "Mon, 01 Jan 2024 00:00:00 GMT");
    }

    #[test]
    fn status_header_values_are_uppercase_status_names() {
        assert_eq!(status_header_value(IsrStatus::Miss), "MISS");
        assert_eq!(status_header_value(IsrStatus::Skip), "SKIP");
    }
}
