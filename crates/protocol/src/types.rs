use std::fmt;

use serde::{Deserialize, Serialize};

/// Inclusive byte range of one transmitted part, rendered as `bytes a-b/*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartRange {
    pub start: u64,
    pub end: u64,
}

impl PartRange {
    /// Builds the range covering `length` bytes starting at `offset`.
    ///
    /// Returns `None` for an empty part, which has no inclusive range.
    pub fn from_offset(offset: u64, length: u64) -> Option<Self> {
        if length == 0 {
            return None;
        }
        Some(Self {
            start: offset,
            end: offset + length - 1,
        })
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always `false`; an inclusive range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// First byte offset after this range.
    pub fn end_exclusive(&self) -> u64 {
        self.end + 1
    }

    /// Returns `true` if the two ranges share at least one byte.
    pub fn overlaps(&self, other: &PartRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for PartRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/*", self.start, self.end)
    }
}

/// Lifecycle of one archive transfer.
///
/// `Initiating -> Transferring -> Finalizing -> Done`, with `Failed`
/// reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    #[serde(rename = "initiating")]
    Initiating,
    #[serde(rename = "transferring")]
    Transferring,
    #[serde(rename = "finalizing")]
    Finalizing,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "failed")]
    Failed,
}

impl TransferState {
    /// Returns `true` for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Done | TransferState::Failed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Initiating => "initiating",
            TransferState::Transferring => "transferring",
            TransferState::Finalizing => "finalizing",
            TransferState::Done => "done",
            TransferState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_from_offset_is_inclusive() {
        let r = PartRange::from_offset(16, 16).unwrap();
        assert_eq!(r.start, 16);
        assert_eq!(r.end, 31);
        assert_eq!(r.len(), 16);
        assert_eq!(r.end_exclusive(), 32);
    }

    #[test]
    fn empty_part_has_no_range() {
        assert!(PartRange::from_offset(0, 0).is_none());
    }

    #[test]
    fn range_header_format() {
        let r = PartRange::from_offset(0, 1024).unwrap();
        assert_eq!(r.to_string(), "bytes 0-1023/*");
    }

    #[test]
    fn overlap_detection() {
        let a = PartRange::from_offset(0, 16).unwrap();
        let b = PartRange::from_offset(16, 16).unwrap();
        let c = PartRange::from_offset(8, 16).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn state_serde_names() {
        let json = serde_json::to_string(&TransferState::Transferring).unwrap();
        assert_eq!(json, "\"transferring\"");
        let parsed: TransferState = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, TransferState::Failed);
        assert!(parsed.is_terminal());
        assert!(!TransferState::Finalizing.is_terminal());
    }
}
