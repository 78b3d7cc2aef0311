//! Caching chunk proxy for a size-limited attachment API.
//!
//! The origin caps each download call at a small payload; the proxy fetches an
//! attachment once, keeps it in memory for a TTL and serves it back in
//! client-chosen chunks over the same wire protocol. The client side lives in
//! the `chunk-dl` crate.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod origin;
pub mod proxy;
pub mod types;

pub use cache::{CacheEntry, CacheStats, CacheStore};
pub use config::ProxyConfig;
pub use error::{ConfigError, OriginError, ProxyError, ServeError};
pub use proxy::{ChunkRequest, ChunkResponse, ChunkService, Proxy, ProxyStats};
pub use types::AttachmentId;
