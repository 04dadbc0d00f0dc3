//! Unified error type for the ISR engine, using thiserror.
//!
//! Every failure mode named in the request-lifecycle and cache-consistency
//! contracts gets its own variant so callers can match on cause rather than
//! parse messages. `status_code` / `is_client_fault` give adapters a ready
//! mapping onto the wire without leaking storage-engine details.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid route pattern {pattern:?}: {reason}")]
    PatternInvalid { pattern: String, reason: String },

    #[error("invalid tag {tag:?}: {reason}")]
    TagInvalid { tag: String, reason: String },

    #[error("too many tags: {count} exceeds limit of {limit}")]
    TooManyTags { count: usize, limit: usize },

    #[error("cache layer unavailable: {0}")]
    CacheLayerUnavailable(String),

    #[error("cache write failed: {0}")]
    CacheWriteFailed(String),

    #[error("tag index write failed: {0}")]
    IndexWriteFailed(String),

    #[error("lock unavailable")]
    LockUnavailable,

    #[error("render timed out after {0:?}")]
    RenderTimeout(Duration),

    #[error("render failed: {0}")]
    RenderFailed(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("cache entry failed integrity validation: {0}")]
    Integrity(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status an adapter should surface for this error. Only the tag
    /// index's client-input validation errors are 400-class; everything
    /// else is an opaque internal error (§7: never leak storage details).
    pub fn status_code(&self) -> u16 {
        match self {
            Error::PatternInvalid { .. }
            | Error::TagInvalid { .. }
            | Error::TooManyTags { .. }
            | Error::Validation(_) => 400,
            _ => 500,
        }
    }

    /// Whether this error originates from invalid caller input (as opposed
    /// to an internal/storage fault).
    pub fn is_client_fault(&self) -> bool {
        self.status_code() == 400
    }

    pub fn cache_layer_unavailable(message: impl Into<String>) -> Self {
        Error::CacheLayerUnavailable(message.into())
    }

    pub fn cache_write_failed(message: impl Into<String>) -> Self {
        Error::CacheWriteFailed(message.into())
    }

    pub fn index_write_failed(message: impl Into<String>) -> Self {
        Error::IndexWriteFailed(message.into())
    }
}
