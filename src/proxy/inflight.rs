//! Single-flight registry for origin fetches
//!
//! At most one fetch per attachment id is registered at a time. The first
//! caller registers a shared future; later callers clone it and await the same
//! result. The fetch task deregisters itself only after the cache has been
//! populated, and registration re-checks the cache under the registry lock, so
//! a caller arriving in between sees the cached entry instead of starting a
//! second fetch.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use tokio::sync::Mutex;

use crate::cache::{CacheEntry, CacheStore};
use crate::error::OriginError;
use crate::types::AttachmentId;

pub type FlightResult = Result<Arc<CacheEntry>, Arc<OriginError>>;
pub type Flight = Shared<BoxFuture<'static, FlightResult>>;

/// Outcome of [`InFlightFetches::join_or_start`]
pub enum Joined {
    /// Populated by a fetch that finished while we waited for the lock
    Cached(Arc<CacheEntry>),
    /// This caller registered the fetch
    Leader(Flight),
    /// Another caller's fetch is already running
    Waiter(Flight),
}

#[derive(Default)]
pub struct InFlightFetches {
    flights: Mutex<HashMap<AttachmentId, Flight>>,
}

impl InFlightFetches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the running fetch for `attach_id`, or register the one built by
    /// `start`. `start` runs under the registry lock and must not block.
    pub async fn join_or_start<F>(
        &self,
        attach_id: &AttachmentId,
        cache: &CacheStore,
        start: F,
    ) -> Joined
    where
        F: FnOnce() -> BoxFuture<'static, FlightResult>,
    {
        let mut flights = self.flights.lock().await;
        if let Some(entry) = cache.get(attach_id).await {
            return Joined::Cached(entry);
        }
        if let Some(flight) = flights.get(attach_id) {
            debug!("fetch_join: {}", attach_id);
            return Joined::Waiter(flight.clone());
        }
        let flight = start().shared();
        flights.insert(attach_id.clone(), flight.clone());
        debug!("fetch_register: {}", attach_id);
        Joined::Leader(flight)
    }

    pub async fn complete(&self, attach_id: &AttachmentId) {
        self.flights.lock().await.remove(attach_id);
        debug!("fetch_deregister: {}", attach_id);
    }

    pub async fn len(&self) -> usize {
        self.flights.lock().await.len()
    }
}
