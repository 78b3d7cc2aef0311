//! Download session types and defaults

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Default chunk size, kept under the origin's per-call payload limit
pub const DEFAULT_CHUNK_SIZE: u64 = 60_000;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Called with `(bytes_written, total_size)` after every committed chunk
pub type ProgressCallback = Box<dyn FnMut(u64, u64) + Send>;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub chunk_size: u64,
    pub max_retries: u32,
    /// Applies to each chunk request independently
    pub chunk_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        DownloadOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Summary of a completed download
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub attach_id: String,
    pub destination: PathBuf,
    pub total_size: u64,
    pub chunks: u32,
    /// Retries consumed across all chunks
    pub retries: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    FetchingChunk,
    ChunkOk,
    ChunkFail,
    Retrying,
    RetryExhausted,
    Complete,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Init => write!(f, "init"),
            SessionState::FetchingChunk => write!(f, "fetching_chunk"),
            SessionState::ChunkOk => write!(f, "chunk_ok"),
            SessionState::ChunkFail => write!(f, "chunk_fail"),
            SessionState::Retrying => write!(f, "retrying"),
            SessionState::RetryExhausted => write!(f, "retry_exhausted"),
            SessionState::Complete => write!(f, "complete"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}
