//! Data types for the upload flow.

use std::path::PathBuf;

use coldpush_protocol::TransferState;
use coldpush_transfer::TreeHash;

use crate::error::UploadError;

/// Everything the pipeline needs to upload one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub vault_name: String,
    /// Requested part size in bytes. Collapses to the file size for small files.
    pub chunk_size: usize,
    pub description: String,
    pub source_path: PathBuf,
    /// Region or endpoint the vault lives in.
    pub region: String,
}

impl UploadConfig {
    /// Rejects missing mandatory inputs before any transfer work starts.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.vault_name.trim().is_empty() {
            return Err(UploadError::Configuration("vault name is required".into()));
        }
        if self.source_path.as_os_str().is_empty() {
            return Err(UploadError::Configuration(
                "archive file path is required".into(),
            ));
        }
        coldpush_transfer::validate_chunk_size(self.chunk_size)
            .map_err(|e| UploadError::Configuration(e.to_string()))?;
        Ok(())
    }
}

/// Queue and pool sizes that bound pipeline memory.
///
/// Peak memory is roughly `(read_queue + upload_queue + pool_capacity + 3)`
/// chunks, independent of the file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    /// Chunks buffered between the reader and the checksum stage.
    pub read_queue: usize,
    /// Chunks buffered between the checksum stage and the sender.
    pub upload_queue: usize,
    /// Idle buffers kept for reuse.
    pub pool_capacity: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            read_queue: 3,
            upload_queue: 10,
            pool_capacity: 3,
        }
    }
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The transfer moved to a new state.
    StateChanged(TransferState),
    /// A part was accepted by the service.
    PartUploaded {
        offset: u64,
        length: usize,
        checksum: String,
    },
    /// The archive was created.
    Completed { archive_id: String },
    /// The transfer failed.
    Failed { error: String },
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub archive_id: String,
    pub location: String,
    pub checksum: TreeHash,
    pub archive_size: u64,
    pub parts: u64,
}
