//! Chunk service: cache lookup, single-flight origin fetch, range slicing

use std::sync::Arc;

use futures_util::future::FutureExt;
use log::{error, info, warn};

use super::inflight::{FlightResult, InFlightFetches, Joined};
use super::types::{ChunkRequest, ChunkResponse, Counters, ProxyStats};
use crate::cache::{CacheEntry, CacheStore};
use crate::error::{OriginError, ProxyError};
use crate::origin::{fetch_full, Origin};
use crate::types::AttachmentId;

/// Origin call limits applied to every full fetch
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub max_payload: u64,
    pub max_object_size: u64,
}

#[derive(Clone)]
pub struct ChunkService {
    origin: Arc<dyn Origin>,
    cache: Arc<CacheStore>,
    flights: Arc<InFlightFetches>,
    counters: Arc<Counters>,
    limits: FetchLimits,
}

impl ChunkService {
    pub fn new(origin: Arc<dyn Origin>, cache: Arc<CacheStore>, limits: FetchLimits) -> Self {
        ChunkService {
            origin,
            cache,
            flights: Arc::new(InFlightFetches::new()),
            counters: Arc::new(Counters::default()),
            limits,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub async fn get_chunk(&self, request: &ChunkRequest) -> Result<ChunkResponse, ProxyError> {
        if request.attach_id.is_empty() {
            return Err(ProxyError::BadRequest("AttachId is empty".to_string()));
        }
        if request.length == 0 {
            return Err(ProxyError::InvalidRange(format!(
                "zero-length chunk requested at offset {}",
                request.offset
            )));
        }

        let entry = self
            .entry_for(&request.attach_id, request.wxid.as_deref())
            .await?;
        let response = slice_chunk(&entry, request.offset, request.length)?;

        Counters::bump(&self.counters.chunks_served);
        self.counters.bytes_served.fetch_add(
            response.bytes.len() as u64,
            std::sync::atomic::Ordering::Relaxed,
        );
        Ok(response)
    }

    /// Full cached payload for `attach_id`, fetching it once if needed
    async fn entry_for(
        &self,
        attach_id: &AttachmentId,
        wxid: Option<&str>,
    ) -> Result<Arc<CacheEntry>, ProxyError> {
        if let Some(entry) = self.cache.get(attach_id).await {
            Counters::bump(&self.counters.cache_hits);
            return Ok(entry);
        }

        let joined = self
            .flights
            .join_or_start(attach_id, &self.cache, || {
                self.start_fetch(attach_id.clone(), wxid.map(str::to_string))
                    .boxed()
            })
            .await;

        let flight = match joined {
            Joined::Cached(entry) => {
                Counters::bump(&self.counters.cache_hits);
                return Ok(entry);
            }
            Joined::Leader(flight) => {
                Counters::bump(&self.counters.cache_misses);
                info!("cache_miss: {} (fetching)", attach_id);
                flight
            }
            Joined::Waiter(flight) => {
                Counters::bump(&self.counters.cache_misses);
                info!("cache_miss: {} (joining fetch)", attach_id);
                flight
            }
        };

        flight.await.map_err(|reason| ProxyError::OriginFetchFailed {
            attach_id: attach_id.to_string(),
            reason,
        })
    }

    /// Spawn the detached fetch task; the returned future resolves with its result
    fn start_fetch(
        &self,
        attach_id: AttachmentId,
        wxid: Option<String>,
    ) -> impl std::future::Future<Output = FlightResult> + Send + 'static {
        Counters::bump(&self.counters.origin_fetches);
        let origin = Arc::clone(&self.origin);
        let cache = Arc::clone(&self.cache);
        let flights = Arc::clone(&self.flights);
        let counters = Arc::clone(&self.counters);
        let limits = self.limits;
        let task_id = attach_id.clone();

        let handle = tokio::spawn(async move {
            let fetched = fetch_full(
                origin.as_ref(),
                &attach_id,
                wxid.as_deref(),
                limits.max_payload,
                limits.max_object_size,
            )
            .await;

            let result = match fetched {
                Ok(payload) => Ok(cache.put(attach_id.clone(), payload).await),
                Err(e) => {
                    Counters::bump(&counters.origin_failures);
                    error!("origin_fetch_failed: {}: {}", attach_id, e);
                    Err(Arc::new(e))
                }
            };
            flights.complete(&attach_id).await;
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                warn!("origin_fetch_aborted: {}: {}", task_id, e);
                Err(Arc::new(OriginError::Aborted(e.to_string())))
            })
        }
    }

    pub async fn stats(&self) -> ProxyStats {
        let in_flight = self.flights.len().await;
        self.counters.snapshot(in_flight, self.cache.stats().await)
    }
}

/// Slice the requested range out of a full payload
pub fn slice_chunk(
    entry: &CacheEntry,
    offset: u64,
    length: u64,
) -> Result<ChunkResponse, ProxyError> {
    let total = entry.total_size();
    if total == 0 && offset == 0 {
        return Ok(ChunkResponse {
            bytes: bytes::Bytes::new(),
            offset: 0,
            total_size: 0,
            is_last: true,
        });
    }
    if offset >= total {
        return Err(ProxyError::InvalidRange(format!(
            "offset {} is outside the {}-byte attachment",
            offset, total
        )));
    }

    let end = offset.saturating_add(length).min(total);
    Ok(ChunkResponse {
        bytes: entry.payload().slice(offset as usize..end as usize),
        offset,
        total_size: total,
        is_last: end == total,
    })
}
