//! Sequential chunked download engine for the attachment proxy
//!
//! Downloads one attachment as a series of bounded chunks:
//! - offset 0 is requested first and reports the total size
//! - each chunk is verified, appended to the destination and reported
//! - failed chunks are retried with backoff up to a per-chunk limit
//! - cancellation is honored between chunks

mod client;
mod error;
pub mod protocol;
mod retry;
mod types;
mod worker;

pub use client::{Chunk, ChunkClient};
pub use error::{ChunkError, DownloadError};
pub use retry::BackoffPolicy;
pub use types::{
    DownloadOptions, DownloadReport, ProgressCallback, SessionState, DEFAULT_CHUNK_SIZE,
    DEFAULT_CHUNK_TIMEOUT, DEFAULT_MAX_RETRIES,
};
pub use worker::{download, ChunkDownloader, DownloadSession};
