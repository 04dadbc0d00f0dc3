//! # isr-core
//!
//! Shared types, configuration, and error handling for the ISR (Incremental
//! Static Regeneration) engine: the cache entry data model, route
//! configuration, and the unified error type that every other `isr-*` crate
//! builds on.

pub mod config;
pub mod error;
pub mod types;

pub use config::{IsrConfig, RouteTable};
pub use error::{Error, Result};
pub use types::{
    CacheEntry, CacheEntryMetadata, CacheStatus, HeaderMap, IsrStatus, RenderResult,
    RevalidateValue, RouteConfig,
};

/// The current version of the ISR engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
