use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;

use crate::cache::CacheStats;
use crate::types::AttachmentId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub attach_id: AttachmentId,
    pub offset: u64,
    pub length: u64,
    /// Account forwarded to the origin when this request starts a fetch
    pub wxid: Option<String>,
}

impl ChunkRequest {
    pub fn new(attach_id: impl Into<AttachmentId>, offset: u64, length: u64) -> Self {
        ChunkRequest {
            attach_id: attach_id.into(),
            offset,
            length,
            wxid: None,
        }
    }

    pub fn with_wxid(mut self, wxid: impl Into<String>) -> Self {
        self.wxid = Some(wxid.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResponse {
    pub bytes: Bytes,
    pub offset: u64,
    pub total_size: u64,
    pub is_last: bool,
}

/// Snapshot served at `GET /proxy/stats`
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ProxyStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub origin_fetches: u64,
    pub origin_failures: u64,
    pub chunks_served: u64,
    pub bytes_served: u64,
    /// Origin fetches currently running
    pub in_flight: usize,
    pub cache: CacheStats,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub origin_fetches: AtomicU64,
    pub origin_failures: AtomicU64,
    pub chunks_served: AtomicU64,
    pub bytes_served: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, in_flight: usize, cache: CacheStats) -> ProxyStats {
        ProxyStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            origin_fetches: self.origin_fetches.load(Ordering::Relaxed),
            origin_failures: self.origin_failures.load(Ordering::Relaxed),
            chunks_served: self.chunks_served.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            in_flight,
            cache,
        }
    }
}
