//! Upload error types.

use coldpush_transfer::TransferError;

use crate::service::ServiceError;

/// Errors that fail an archive transfer.
///
/// Every variant is fatal to the whole transfer. `Cancelled` marks a stage
/// that stopped because a sibling failed or the caller cancelled; it is only
/// surfaced when no stage reported a more specific error.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("reading source at offset {offset} failed: {source}")]
    SourceRead {
        offset: u64,
        #[source]
        source: TransferError,
    },

    #[error("opening upload session failed: {0}")]
    Session(#[source] ServiceError),

    #[error("sending part at offset {offset} failed: {source}")]
    Transmission {
        offset: u64,
        #[source]
        source: ServiceError,
    },

    #[error("completing upload failed: {0}")]
    Completion(#[source] ServiceError),

    #[error("internal pipeline error: {0}")]
    Internal(String),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Name of the pipeline step that produced the error.
    pub fn stage(&self) -> &'static str {
        match self {
            UploadError::Configuration(_) => "configuration",
            UploadError::SourceRead { .. } => "read",
            UploadError::Session(_) => "initiate",
            UploadError::Transmission { .. } => "send",
            UploadError::Completion(_) => "complete",
            UploadError::Internal(_) => "internal",
            UploadError::Cancelled => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_offset() {
        let err = UploadError::Transmission {
            offset: 16,
            source: ServiceError::Transport("connection reset".into()),
        };
        assert_eq!(
            err.to_string(),
            "sending part at offset 16 failed: transport error: connection reset"
        );
        assert_eq!(err.stage(), "send");
    }

    #[test]
    fn source_read_wraps_transfer_error() {
        let err = UploadError::SourceRead {
            offset: 32,
            source: TransferError::UnexpectedEof {
                offset: 40,
                expected: 48,
            },
        };
        assert!(err.to_string().contains("offset 32"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn cancelled_is_flagged() {
        assert!(UploadError::Cancelled.is_cancelled());
        assert!(!UploadError::Internal("x".into()).is_cancelled());
    }
}
