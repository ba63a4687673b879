//! Chunked reading and tree-hash checksums for multipart archive uploads.
//!
//! - [`BufferPool`] recycles fixed-size chunk buffers so memory stays bounded
//!   regardless of file size.
//! - [`ChunkReader`] splits a source into contiguous, ordered [`Chunk`]s.
//! - [`tree_hash`] implements the recursive SHA-256 checksum the archive
//!   service verifies per part and per archive.

mod buffer_pool;
mod chunked;
mod progress;
pub mod tree_hash;
mod types;
mod validation;

pub use buffer_pool::BufferPool;
pub use chunked::ChunkReader;
pub use progress::ThroughputMeter;
pub use tree_hash::{
    ArchiveChecksum, ChecksumAccumulator, EMPTY_TREE_HASH, LEAF_SIZE, TreeHash, TreeHasher,
};
pub use types::{Chunk, UploadSession};
pub use validation::{effective_chunk_size, validate_chunk_size, validate_vault_name};

/// Default chunk size: 16 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source ended at byte {offset}, expected {expected} bytes")]
    UnexpectedEof { offset: u64, expected: u64 },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("invalid vault name: {0}")]
    InvalidName(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("chunk at offset {actual} arrived out of order, expected offset {expected}")]
    OutOfOrder { expected: u64, actual: u64 },

    #[error("accumulated {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
}
