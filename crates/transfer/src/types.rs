use std::fmt;

use coldpush_protocol::PartRange;

use crate::tree_hash::TreeHash;

/// A contiguous byte range of the source, carried through the upload pipeline.
///
/// `payload` is a pooled buffer of the full chunk size; only the first
/// `length` bytes are meaningful.
pub struct Chunk {
    /// Absolute byte offset of the first payload byte in the source.
    pub offset: u64,
    /// Number of valid bytes in `payload`.
    pub length: usize,
    /// Pooled buffer holding the chunk data.
    pub payload: Vec<u8>,
    /// Tree-hash of the valid bytes, attached by the checksum stage.
    pub checksum: Option<TreeHash>,
}

impl Chunk {
    /// The valid bytes of this chunk.
    pub fn data(&self) -> &[u8] {
        &self.payload[..self.length]
    }

    /// Inclusive byte range sent to the archive service.
    pub fn range(&self) -> Option<PartRange> {
        PartRange::from_offset(self.offset, self.length as u64)
    }

    /// Gives the buffer back, e.g. for returning it to the pool.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}

/// An open multipart upload. Created once before the transfer and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub upload_id: String,
    pub vault_name: String,
    pub chunk_size: usize,
    pub total_size: u64,
}

impl UploadSession {
    /// Number of parts the archive splits into.
    pub fn part_count(&self) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        self.total_size.div_ceil(self.chunk_size as u64)
    }
}
