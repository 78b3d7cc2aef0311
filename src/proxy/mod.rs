//! Attachment proxy
//!
//! Listens on the origin's own attachment-download path, fetches each
//! attachment from the origin once (single-flight per id), keeps the full
//! payload in the [`CacheStore`] for its TTL and serves arbitrary chunks of it.

mod inflight;
mod passthrough;
mod server;
mod service;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

pub use passthrough::Passthrough;
pub use server::{handle_request, AppState, ProxyServer, STATS_PATH};
pub use service::{slice_chunk, ChunkService, FetchLimits};
pub use types::{ChunkRequest, ChunkResponse, ProxyStats};

use crate::cache::CacheStore;
use crate::config::ProxyConfig;
use crate::error::ServeError;
use crate::origin::HttpOrigin;

/// A bound proxy, ready to serve
pub struct Proxy {
    server: ProxyServer,
    cache: Arc<CacheStore>,
    sweep_interval: Duration,
}

impl Proxy {
    /// Build the origin client, cache and service from `config` and bind the
    /// listening socket
    pub async fn bind(config: &ProxyConfig) -> Result<Self, ServeError> {
        config.validate()?;

        let base_url = config.origin_base_url();
        let origin = Arc::new(HttpOrigin::new(&base_url, config.origin_timeout())?);
        let cache = Arc::new(CacheStore::new(config.cache_ttl()));
        let service = ChunkService::new(
            origin,
            Arc::clone(&cache),
            FetchLimits {
                max_payload: config.origin_max_payload,
                max_object_size: config.max_object_size,
            },
        );
        let http = reqwest::Client::builder()
            .timeout(config.origin_timeout())
            .build()
            .map_err(ServeError::Client)?;
        let state = Arc::new(AppState {
            service,
            passthrough: Passthrough::new(http, &base_url),
            default_chunk_size: config.default_chunk_size,
        });

        let server = ProxyServer::bind(&config.listen_addr(), state).await?;
        info!(
            "proxy_ready: {} -> {} (ttl={}s, origin_max_payload={})",
            server.local_addr(),
            base_url,
            config.cache_ttl_secs,
            config.origin_max_payload
        );
        Ok(Proxy {
            server,
            cache,
            sweep_interval: config.sweep_interval(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn service(&self) -> &ChunkService {
        &self.server.state().service
    }

    /// Serve until `shutdown` fires, then stop the sweeper and empty the cache
    pub async fn run(self, shutdown: CancellationToken) {
        let sweeper = self
            .cache
            .spawn_sweeper(self.sweep_interval, shutdown.child_token());
        self.server.serve(shutdown.clone()).await;

        shutdown.cancel();
        if let Err(e) = sweeper.await {
            warn!("cache sweeper ended abnormally: {}", e);
        }
        self.cache.shutdown().await;
        info!("proxy_stopped");
    }
}

/// Bind and serve until `shutdown` fires
pub async fn run(config: &ProxyConfig, shutdown: CancellationToken) -> Result<(), ServeError> {
    Proxy::bind(config).await?.run(shutdown).await;
    Ok(())
}
