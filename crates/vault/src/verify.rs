//! Server-side recomputation of the archive checksum from stored parts.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use coldpush_transfer::tree_hash::{TreeHash, TreeHasher};

/// Read size used while re-hashing stored parts.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Re-reads every `(offset, length)` part of `data` and returns each part's
/// tree-hash in the given order.
pub(crate) fn rehash_parts(data: &Path, parts: &[(u64, u64)]) -> std::io::Result<Vec<TreeHash>> {
    let mut file = File::open(data)?;
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut hashes = Vec::with_capacity(parts.len());

    for &(offset, length) in parts {
        file.seek(SeekFrom::Start(offset))?;
        let mut hasher = TreeHasher::new();
        let mut remaining = length;
        while remaining > 0 {
            let want = remaining.min(READ_BUF_SIZE as u64) as usize;
            file.read_exact(&mut buf[..want])?;
            hasher.update(&buf[..want]);
            remaining -= want as u64;
        }
        hashes.push(hasher.finalize());
    }

    Ok(hashes)
}
