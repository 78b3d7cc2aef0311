//! Origin attachment API wire types

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Request body of the origin `DownloadAttach` call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OriginRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wxid: Option<String>,
    pub attach_id: String,
    pub start_pos: u64,
    pub data_len: u64,
}

/// `Data` payload of a successful origin response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OriginData {
    pub total_len: u64,
    pub start_pos: u64,
    /// Base64-encoded bytes
    pub buffer: String,
}

/// One decoded origin call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginChunk {
    pub total_len: u64,
    pub start_pos: u64,
    pub bytes: Bytes,
}
