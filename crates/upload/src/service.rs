//! Archive service trait.
//!
//! `ArchiveService` is implemented by whatever actually talks to the vault
//! (a remote API client, or the directory backend). The pipeline only ever
//! sees this trait.

use std::future::Future;
use std::pin::Pin;

use coldpush_protocol::{
    AbortUploadRequest, CompleteUploadRequest, CompleteUploadResponse, InitiateUploadRequest,
    InitiateUploadResponse, UploadPartRequest,
};

/// Boxed future returned by [`ArchiveService`] methods.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Failures reported by an archive service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("missing parts: {0}")]
    MissingParts(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract connection to an archive service.
///
/// Parts are addressed by explicit byte range, so implementations must accept
/// `upload_part` calls in any order.
pub trait ArchiveService: Send + Sync {
    /// Opens a multipart upload and returns its id.
    fn initiate_upload<'a>(
        &'a self,
        request: &'a InitiateUploadRequest,
    ) -> ServiceFuture<'a, InitiateUploadResponse>;

    /// Stores one part. Fails on checksum mismatch or an invalid range.
    fn upload_part<'a>(&'a self, request: UploadPartRequest<'a>) -> ServiceFuture<'a, ()>;

    /// Assembles the parts into an archive after verifying the aggregate checksum.
    fn complete_upload<'a>(
        &'a self,
        request: &'a CompleteUploadRequest,
    ) -> ServiceFuture<'a, CompleteUploadResponse>;

    /// Discards an unfinished upload.
    fn abort_upload<'a>(&'a self, request: &'a AbortUploadRequest) -> ServiceFuture<'a, ()>;

    /// Human readable identity of the endpoint, for logs.
    fn endpoint(&self) -> &str;
}
