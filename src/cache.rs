//! In-memory attachment cache with TTL eviction
//!
//! Holds at most one full payload per attachment id. Entries are immutable once
//! inserted and handed out as `Arc<CacheEntry>`, so readers never observe a
//! partially written payload. Expired entries are treated as absent on lookup
//! and removed by a background sweep.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::AttachmentId;

/// A fully fetched attachment
#[derive(Debug)]
pub struct CacheEntry {
    attach_id: AttachmentId,
    payload: Bytes,
    fetched_at: Instant,
    fetched_at_utc: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(attach_id: AttachmentId, payload: Bytes) -> Self {
        CacheEntry {
            attach_id,
            payload,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        }
    }

    pub fn attach_id(&self) -> &AttachmentId {
        &self.attach_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Always equal to the payload length
    pub fn total_size(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at_utc
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
}

pub struct CacheStore {
    entries: RwLock<HashMap<AttachmentId, Arc<CacheEntry>>>,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        CacheStore {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.age() >= self.ttl
    }

    /// Cached entry for `attach_id`, unless missing or expired
    pub async fn get(&self, attach_id: &AttachmentId) -> Option<Arc<CacheEntry>> {
        let entries = self.entries.read().await;
        entries
            .get(attach_id)
            .filter(|entry| !self.is_expired(entry))
            .cloned()
    }

    /// Insert a full payload, replacing any previous entry
    pub async fn put(&self, attach_id: AttachmentId, payload: Bytes) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry::new(attach_id.clone(), payload));
        let mut entries = self.entries.write().await;
        if entries.insert(attach_id, entry.clone()).is_some() {
            debug!("cache_replace: {}", entry.attach_id);
        }
        entry
    }

    pub async fn evict(&self, attach_id: &AttachmentId) -> bool {
        let removed = self.entries.write().await.remove(attach_id).is_some();
        if removed {
            debug!("cache_evict: {}", attach_id);
        }
        removed
    }

    /// Remove every entry older than the TTL, returning how many were removed
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|id, entry| {
            let keep = entry.age() < self.ttl;
            if !keep {
                debug!("cache_expire: {} ({} bytes)", id, entry.total_size());
            }
            keep
        });
        before - entries.len()
    }

    /// Evict everything; called when the proxy stops
    pub async fn shutdown(&self) -> usize {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        info!("cache_shutdown: evicted {} entries", count);
        count
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.len(),
            bytes: entries.values().map(|e| e.total_size()).sum(),
        }
    }

    /// Run `sweep_expired` every `interval` until `shutdown` fires
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired().await;
                        if removed > 0 {
                            info!("cache_sweep: evicted {} expired entries", removed);
                        }
                    }
                }
            }
            debug!("cache_sweep: stopped");
        })
    }
}
