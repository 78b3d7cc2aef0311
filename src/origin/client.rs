//! HTTP client for the origin attachment API

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chunk_dl::protocol::{decode_buffer, Envelope, DOWNLOAD_ATTACH_PATH};
use log::debug;
use reqwest::Client;

use super::types::{OriginChunk, OriginData, OriginRequest};
use super::Origin;
use crate::error::{OriginError, ServeError};
use crate::types::AttachmentId;

#[derive(Debug, Clone)]
pub struct HttpOrigin {
    http: Client,
    endpoint: String,
}

impl HttpOrigin {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ServeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ServeError::Client)?;
        Ok(Self::with_http_client(http, base_url))
    }

    pub fn with_http_client(http: Client, base_url: &str) -> Self {
        HttpOrigin {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), DOWNLOAD_ATTACH_PATH),
        }
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch_range(
        &self,
        attach_id: &AttachmentId,
        wxid: Option<&str>,
        start: u64,
        max_len: u64,
    ) -> Result<OriginChunk, OriginError> {
        let body = OriginRequest {
            wxid: wxid.map(str::to_string),
            attach_id: attach_id.to_string(),
            start_pos: start,
            data_len: max_len,
        };
        debug!("origin_call: {} start={} len={}", attach_id, start, max_len);

        let response = self.http.post(&self.endpoint).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OriginError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let bytes = response.bytes().await?;
        let envelope: Envelope<OriginData> = serde_json::from_slice(&bytes)
            .map_err(|e| OriginError::Malformed(format!("invalid JSON envelope: {}", e)))?;

        if !envelope.success {
            return Err(OriginError::Rejected {
                code: envelope.code,
                message: envelope.message,
            });
        }

        let data = envelope
            .data
            .ok_or_else(|| OriginError::Malformed("missing Data".to_string()))?;
        let decoded = decode_buffer(&data.buffer)
            .map_err(|e| OriginError::Malformed(format!("invalid base64 buffer: {}", e)))?;

        Ok(OriginChunk {
            total_len: data.total_len,
            start_pos: data.start_pos,
            bytes: Bytes::from(decoded),
        })
    }
}
