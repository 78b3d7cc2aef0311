//! Origin attachment API access
//!
//! The origin returns at most `origin_max_payload` bytes per call, so a full
//! attachment is assembled by looping `fetch_range` until `TotalLen` bytes
//! have been collected.

mod client;
pub mod types;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::{debug, info};

pub use client::HttpOrigin;
pub use types::OriginChunk;

use crate::error::OriginError;
use crate::types::AttachmentId;

/// Upper bound on the up-front buffer reservation; larger objects grow as bytes arrive
const INITIAL_RESERVE: u64 = 8 * 1024 * 1024;

#[async_trait]
pub trait Origin: Send + Sync {
    /// One origin call: up to `max_len` bytes starting at `start`
    async fn fetch_range(
        &self,
        attach_id: &AttachmentId,
        wxid: Option<&str>,
        start: u64,
        max_len: u64,
    ) -> Result<OriginChunk, OriginError>;
}

/// Fetch a whole attachment with as many origin calls as needed
pub async fn fetch_full(
    origin: &dyn Origin,
    attach_id: &AttachmentId,
    wxid: Option<&str>,
    max_payload: u64,
    max_object_size: u64,
) -> Result<Bytes, OriginError> {
    let first = origin.fetch_range(attach_id, wxid, 0, max_payload).await?;
    let total = first.total_len;
    if total > max_object_size {
        return Err(OriginError::TooLarge {
            size: total,
            limit: max_object_size,
        });
    }

    let mut buffer = BytesMut::with_capacity(total.min(INITIAL_RESERVE) as usize);
    let mut calls = 0usize;
    let mut chunk = first;
    loop {
        calls += 1;
        let position = buffer.len() as u64;
        if chunk.total_len != total {
            return Err(OriginError::Malformed(format!(
                "TotalLen changed from {} to {}",
                total, chunk.total_len
            )));
        }
        if chunk.start_pos != position {
            return Err(OriginError::Malformed(format!(
                "expected StartPos {}, got {}",
                position, chunk.start_pos
            )));
        }
        if position + chunk.bytes.len() as u64 > total {
            return Err(OriginError::Malformed(format!(
                "{} bytes at {} overrun TotalLen {}",
                chunk.bytes.len(),
                position,
                total
            )));
        }
        if chunk.bytes.is_empty() && position < total {
            return Err(OriginError::Malformed(format!(
                "empty buffer at {} of {}",
                position, total
            )));
        }

        buffer.extend_from_slice(&chunk.bytes);
        let position = buffer.len() as u64;
        debug!("origin_fetch: {} {}/{}", attach_id, position, total);

        if position >= total {
            break;
        }
        chunk = origin
            .fetch_range(attach_id, wxid, position, max_payload)
            .await?;
    }

    info!(
        "origin_fetch_complete: {} ({} bytes in {} calls)",
        attach_id, total, calls
    );
    Ok(buffer.freeze())
}
