use std::fs::File;
use std::io::{ErrorKind, Read};
use std::sync::Arc;

use tracing::debug;

use crate::TransferError;
use crate::buffer_pool::BufferPool;
use crate::types::Chunk;

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a source sequentially into pooled, fixed-size chunks.
///
/// Chunks cover `[0, total_size)` in order with no gaps or overlaps. Every
/// chunk is `pool.buffer_size()` long except possibly the last. The sequence
/// is not restartable: once it ends, or fails, it stays ended.
pub struct ChunkReader<R = File> {
    source: R,
    pool: Arc<BufferPool>,
    offset: u64,
    total_size: u64,
    done: bool,
}

impl<R: Read> ChunkReader<R> {
    /// Wraps a source that is expected to yield exactly `total_size` bytes.
    pub fn new(source: R, total_size: u64, pool: Arc<BufferPool>) -> Result<Self, TransferError> {
        if pool.buffer_size() == 0 && total_size > 0 {
            return Err(TransferError::InvalidChunkSize(
                "chunk size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            source,
            pool,
            offset: 0,
            total_size,
            done: false,
        })
    }

    /// Reads the next chunk. Returns `None` once the whole source was emitted.
    ///
    /// A source that ends before `total_size` bytes fails with
    /// [`TransferError::UnexpectedEof`]. After any error the reader is finished.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.done || self.remaining() == 0 {
            self.done = true;
            return Ok(None);
        }

        let want = self.remaining().min(self.pool.buffer_size() as u64) as usize;
        let mut buf = self.pool.acquire();

        let n = match read_full(&mut self.source, &mut buf[..want]) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                self.pool.release(buf);
                return Err(e.into());
            }
        };

        if n < want {
            self.done = true;
            self.pool.release(buf);
            return Err(TransferError::UnexpectedEof {
                offset: self.offset + n as u64,
                expected: self.total_size,
            });
        }

        let chunk = Chunk {
            offset: self.offset,
            length: n,
            payload: buf,
            checksum: None,
        };
        self.offset += n as u64;
        if self.remaining() == 0 {
            debug!(total_bytes = self.total_size, "source fully read");
        }
        Ok(Some(chunk))
    }

    /// Offset of the next chunk to be read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes not yet emitted.
    pub fn remaining(&self) -> u64 {
        self.total_size - self.offset
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<Chunk, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Fills `buf` completely unless the source hits end-of-stream first.
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
