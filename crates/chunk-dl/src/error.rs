//! Error types for chunk transfers and download sessions

use std::path::PathBuf;
use thiserror::Error;

/// A single failed chunk attempt
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The proxy rejected the requested range. Never retried.
    #[error("range rejected by proxy: {0}")]
    InvalidRange(String),

    /// 4xx other than 416: the request itself is wrong. Never retried.
    #[error("request rejected by proxy ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("proxy returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed chunk response: {0}")]
    Malformed(String),
}

impl ChunkError {
    /// Whether the failure consumes a retry instead of ending the session
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ChunkError::InvalidRange(_) | ChunkError::Rejected { .. }
        )
    }
}

impl From<reqwest::Error> for ChunkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChunkError::Timeout
        } else {
            ChunkError::Transport(err)
        }
    }
}

/// Terminal failure of a download session
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid range for attachment {attach_id} at offset {offset}: {message}")]
    InvalidRange {
        attach_id: String,
        offset: u64,
        message: String,
    },

    #[error("request for attachment {attach_id} at offset {offset} rejected: {reason}")]
    Rejected {
        attach_id: String,
        offset: u64,
        #[source]
        reason: ChunkError,
    },

    #[error("chunk at offset {offset} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        offset: u64,
        attempts: u32,
        #[source]
        last_error: ChunkError,
    },

    #[error("attachment size changed from {expected} to {actual} during download")]
    SizeChanged { expected: u64, actual: u64 },

    #[error("download cancelled after {bytes_written} bytes")]
    Cancelled { bytes_written: u64 },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid download options: {0}")]
    InvalidOptions(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl DownloadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_fatal() {
        assert!(!ChunkError::InvalidRange("past end".into()).is_retryable());
        assert!(!ChunkError::Rejected {
            status: 400,
            message: "AttachId is empty".into()
        }
        .is_retryable());
        assert!(ChunkError::Timeout.is_retryable());
        assert!(ChunkError::Malformed("short".into()).is_retryable());
        assert!(ChunkError::Status {
            status: 502,
            message: "origin down".into()
        }
        .is_retryable());
    }
}
