//! Wire types for the attachment download protocol
//!
//! The proxy speaks the same JSON envelope as the origin attachment API so that
//! existing API clients only need a host/port change. Chunk requests extend the
//! origin body with `Offset`/`Length`; the origin's own `StartPos`/`DataLen`
//! names are accepted as aliases.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

/// Path of the attachment download call on both origin and proxy
pub const DOWNLOAD_ATTACH_PATH: &str = "/api/Tools/DownloadAttach";

/// Response envelope shared by every API call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Envelope {
            success: true,
            code: 0,
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Envelope {
            success: false,
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Chunk request body sent to the proxy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChunkRequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wxid: Option<String>,
    pub attach_id: String,
    #[serde(default, alias = "StartPos", skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, alias = "DataLen", skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// `Data` payload of a successful chunk response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChunkData {
    pub total_len: u64,
    pub offset: u64,
    /// Same as `offset`; keeps the reply readable as an origin `Data` payload
    #[serde(default)]
    pub start_pos: u64,
    pub is_last: bool,
    /// Base64-encoded chunk bytes
    pub buffer: String,
}

pub fn encode_buffer(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_buffer(buffer: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(buffer)
}
