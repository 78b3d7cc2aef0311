//! Single chunk requests against the proxy

use std::time::Duration;

use reqwest::Client;

use crate::error::{ChunkError, DownloadError};
use crate::protocol::{decode_buffer, ChunkData, ChunkRequestBody, Envelope, DOWNLOAD_ATTACH_PATH};

/// One chunk as returned by the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    pub offset: u64,
    pub total_size: u64,
    pub is_last: bool,
}

#[derive(Debug, Clone)]
pub struct ChunkClient {
    http: Client,
    endpoint: String,
    wxid: Option<String>,
}

impl ChunkClient {
    /// Client for a proxy reachable at `proxy_base` (e.g. `http://127.0.0.1:9001`)
    pub fn new(proxy_base: &str) -> Result<Self, DownloadError> {
        let http = Client::builder().build().map_err(DownloadError::Client)?;
        Ok(Self::with_http_client(http, proxy_base))
    }

    pub fn with_http_client(http: Client, proxy_base: &str) -> Self {
        let endpoint = format!("{}{}", proxy_base.trim_end_matches('/'), DOWNLOAD_ATTACH_PATH);
        ChunkClient {
            http,
            endpoint,
            wxid: None,
        }
    }

    /// Account id forwarded to the origin with every request
    pub fn with_wxid(mut self, wxid: impl Into<String>) -> Self {
        self.wxid = Some(wxid.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn fetch_chunk(
        &self,
        attach_id: &str,
        offset: u64,
        length: u64,
        timeout: Duration,
    ) -> Result<Chunk, ChunkError> {
        let body = ChunkRequestBody {
            wxid: self.wxid.clone(),
            attach_id: attach_id.to_string(),
            offset: Some(offset),
            length: Some(length),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        let envelope: Option<Envelope<ChunkData>> = serde_json::from_slice(&bytes).ok();

        if !status.is_success() {
            let message = envelope
                .map(|e| e.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(status_error(status.as_u16(), message));
        }

        let envelope = envelope
            .ok_or_else(|| ChunkError::Malformed("response is not a JSON envelope".to_string()))?;

        if !envelope.success {
            let status = u16::try_from(envelope.code).unwrap_or(0);
            return Err(status_error(status, envelope.message));
        }

        let data = envelope
            .data
            .ok_or_else(|| ChunkError::Malformed("missing Data".to_string()))?;

        if data.offset != offset {
            return Err(ChunkError::Malformed(format!(
                "requested offset {} but proxy answered {}",
                offset, data.offset
            )));
        }

        let bytes = decode_buffer(&data.buffer)
            .map_err(|e| ChunkError::Malformed(format!("invalid base64 buffer: {}", e)))?;

        Ok(Chunk {
            bytes,
            offset: data.offset,
            total_size: data.total_len,
            is_last: data.is_last,
        })
    }
}

/// 416 and other 4xx end the session; everything else is worth retrying
fn status_error(status: u16, message: String) -> ChunkError {
    match status {
        416 => ChunkError::InvalidRange(message),
        400..=499 => ChunkError::Rejected { status, message },
        _ => ChunkError::Status { status, message },
    }
}
