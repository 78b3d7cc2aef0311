//! Error types for the proxy

use std::path::PathBuf;
use std::sync::Arc;

use hyper::StatusCode;
use thiserror::Error;

/// Failure talking to the origin attachment API
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("origin request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("origin returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("origin rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("malformed origin response: {0}")]
    Malformed(String),

    #[error("attachment is {size} bytes, over the {limit}-byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("origin fetch task aborted: {0}")]
    Aborted(String),
}

/// Errors returned by chunk requests. Every variant maps to an HTTP status.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Shared by every waiter of the failed fetch
    #[error("origin fetch failed for {attach_id}: {reason}")]
    OriginFetchFailed {
        attach_id: String,
        reason: Arc<OriginError>,
    },
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            ProxyError::OriginFetchFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure starting or running the proxy server
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_errors_map_to_http_statuses() {
        assert_eq!(
            ProxyError::BadRequest("missing AttachId".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::InvalidRange("offset 10 of 5".into()).status_code(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        let origin = ProxyError::OriginFetchFailed {
            attach_id: "a".into(),
            reason: Arc::new(OriginError::Malformed("empty buffer".into())),
        };
        assert_eq!(origin.status_code(), StatusCode::BAD_GATEWAY);
        assert!(origin.to_string().contains("empty buffer"));
    }
}
