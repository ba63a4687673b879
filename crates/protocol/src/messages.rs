use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::PartRange;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a multipart upload in a vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadRequest {
    pub vault_name: String,
    pub part_size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Sends one part of an open upload.
///
/// `checksum` is the hex-encoded tree-hash of `body`; the service recomputes
/// it and rejects the part on mismatch.
#[derive(Clone, Copy)]
pub struct UploadPartRequest<'a> {
    pub vault_name: &'a str,
    pub upload_id: &'a str,
    pub range: PartRange,
    pub checksum: &'a str,
    pub body: &'a [u8],
}

impl fmt::Debug for UploadPartRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPartRequest")
            .field("vault_name", &self.vault_name)
            .field("upload_id", &self.upload_id)
            .field("range", &self.range)
            .field("checksum", &self.checksum)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Finalizes an upload once every part has been sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub vault_name: String,
    pub upload_id: String,
    pub archive_size: u64,
    /// Hex-encoded tree-hash of the whole archive.
    pub checksum: String,
}

/// Discards an upload and every part sent so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    pub vault_name: String,
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Acknowledges upload initiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadResponse {
    pub upload_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
}

/// Describes the archive created by a completed upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub archive_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    pub checksum: String,
}
