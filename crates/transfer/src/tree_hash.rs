//! Recursive SHA-256 "tree-hash" checksums.
//!
//! The archive service verifies every part and the whole archive with the
//! same construction:
//!
//! 1. Split the bytes into 1 MiB leaves (the last one may be shorter) and
//!    SHA-256 each leaf.
//! 2. Repeatedly replace the list of digests with `SHA256(left || right)` for
//!    each consecutive pair, passing an unpaired trailing digest up unchanged,
//!    until one digest remains.
//!
//! A part's tree-hash is computed once and reused as a leaf of the archive
//! hash: the archive checksum is [`combine`] over the part hashes in
//! ascending offset order. When parts are whole multiples of 1 MiB this equals
//! the tree-hash of the entire file.
//!
//! Empty input hashes to [`EMPTY_TREE_HASH`], the SHA-256 of zero bytes. This
//! covers both an empty part and an archive with no parts.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::TransferError;

/// Leaf size of the tree: 1 MiB.
pub const LEAF_SIZE: usize = 1024 * 1024;

/// Tree-hash of zero bytes: `SHA256("")`.
pub const EMPTY_TREE_HASH: TreeHash = TreeHash([
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
]);

/// A 32-byte tree-hash digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeHash([u8; 32]);

impl TreeHash {
    /// Parses a 64-character hex digest.
    pub fn from_hex(s: &str) -> Result<Self, TransferError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| TransferError::InvalidChecksum(format!("{s:?}: {e}")))?;
        Ok(Self(out))
    }

    /// Lowercase hex encoding, as sent to the archive service.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeHash({})", self.to_hex())
    }
}

fn sha256(data: &[u8]) -> TreeHash {
    TreeHash(Sha256::digest(data).into())
}

fn hash_pair(left: &TreeHash, right: &TreeHash) -> TreeHash {
    let mut hasher = Sha256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    TreeHash(hasher.finalize().into())
}

// ---------------------------------------------------------------------------
// One-shot API
// ---------------------------------------------------------------------------

/// SHA-256 of each consecutive [`LEAF_SIZE`] block of `data`, in order.
///
/// Returns an empty list for empty input.
pub fn leaf_hashes(data: &[u8]) -> Vec<TreeHash> {
    data.chunks(LEAF_SIZE).map(sha256).collect()
}

/// Reduces an ordered list of digests to a single tree root.
///
/// Each level pairs digests left to right; an odd trailing digest is carried
/// to the next level unchanged. An empty list yields [`EMPTY_TREE_HASH`].
pub fn combine(hashes: &[TreeHash]) -> TreeHash {
    let Some(first) = hashes.first() else {
        return EMPTY_TREE_HASH;
    };
    if hashes.len() == 1 {
        return *first;
    }

    let mut level: Vec<TreeHash> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}

/// Tree-hash of `data`: `combine(leaf_hashes(data))`.
pub fn tree_hash(data: &[u8]) -> TreeHash {
    combine(&leaf_hashes(data))
}

/// Tree-hash of a file, streamed through a [`TreeHasher`].
pub fn hash_file(path: &Path) -> Result<TreeHash, TransferError> {
    let mut file = File::open(path)?;
    let mut hasher = TreeHasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Streaming hasher
// ---------------------------------------------------------------------------

/// Incremental tree-hash over a byte stream.
///
/// Keeps one partially filled leaf plus a stack of at most one digest per
/// tree level, so memory is logarithmic in the input size. Produces the same
/// root as [`tree_hash`] over the concatenated input.
pub struct TreeHasher {
    leaf: Sha256,
    leaf_len: usize,
    stack: Vec<(u32, TreeHash)>,
}

impl Default for TreeHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeHasher {
    pub fn new() -> Self {
        Self {
            leaf: Sha256::new(),
            leaf_len: 0,
            stack: Vec::with_capacity(32),
        }
    }

    /// Feeds more bytes into the hash.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (LEAF_SIZE - self.leaf_len).min(data.len());
            self.leaf.update(&data[..take]);
            self.leaf_len += take;
            data = &data[take..];
            if self.leaf_len == LEAF_SIZE {
                self.finish_leaf();
            }
        }
    }

    /// Consumes the hasher and returns the tree root.
    pub fn finalize(mut self) -> TreeHash {
        if self.leaf_len > 0 {
            self.finish_leaf();
        }
        // Unpaired digests are promoted, so the remaining stack folds right to left.
        let mut root = match self.stack.pop() {
            Some((_, hash)) => hash,
            None => return EMPTY_TREE_HASH,
        };
        while let Some((_, left)) = self.stack.pop() {
            root = hash_pair(&left, &root);
        }
        root
    }

    fn finish_leaf(&mut self) {
        let digest = TreeHash(std::mem::take(&mut self.leaf).finalize().into());
        self.leaf_len = 0;

        let mut level = 0;
        let mut node = digest;
        while let Some(&(top_level, top)) = self.stack.last() {
            if top_level != level {
                break;
            }
            self.stack.pop();
            node = hash_pair(&top, &node);
            level += 1;
        }
        self.stack.push((level, node));
    }
}

// ---------------------------------------------------------------------------
// Ordered part accumulator
// ---------------------------------------------------------------------------

/// Collects per-part tree-hashes in strictly ascending, contiguous offset order.
///
/// Owned by whoever computes part checksums; nothing else reads it until
/// [`finish`](Self::finish) hands out the immutable [`ArchiveChecksum`].
#[derive(Debug, Default)]
pub struct ChecksumAccumulator {
    next_offset: u64,
    part_hashes: Vec<TreeHash>,
}

impl ChecksumAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the hash of the part covering `[offset, offset + length)`.
    ///
    /// Fails with [`TransferError::OutOfOrder`] unless `offset` equals the
    /// number of bytes accumulated so far.
    pub fn push(&mut self, offset: u64, length: u64, hash: TreeHash) -> Result<(), TransferError> {
        if offset != self.next_offset {
            return Err(TransferError::OutOfOrder {
                expected: self.next_offset,
                actual: offset,
            });
        }
        self.part_hashes.push(hash);
        self.next_offset += length;
        Ok(())
    }

    /// Bytes covered by the parts pushed so far.
    pub fn bytes_accumulated(&self) -> u64 {
        self.next_offset
    }

    /// Number of parts pushed so far.
    pub fn parts(&self) -> usize {
        self.part_hashes.len()
    }

    /// Aggregates the parts into the archive checksum.
    pub fn finish(self) -> ArchiveChecksum {
        ArchiveChecksum {
            root: combine(&self.part_hashes),
            part_hashes: self.part_hashes,
            total_size: self.next_offset,
        }
    }
}

/// Final archive-level checksum with the part hashes it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveChecksum {
    pub root: TreeHash,
    pub part_hashes: Vec<TreeHash>,
    pub total_size: u64,
}
