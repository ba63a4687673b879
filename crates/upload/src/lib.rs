//! Pipelined multipart upload of one file into a cold-storage vault.
//!
//! This crate holds the **transfer logic** only. The remote archive service
//! is reached through the [`ArchiveService`] trait, which keeps the pipeline
//! independent of any transport and testable with mocks.
//!
//! # Pipeline
//!
//! 1. **Initiate**: open a multipart upload session
//! 2. **Read**: split the file into pooled, fixed-size chunks
//! 3. **Checksum**: tree-hash each chunk in offset order and accumulate
//!    the per-chunk roots
//! 4. **Send**: transmit each chunk with its byte range and checksum
//! 5. **Complete**: finalize with the total size and archive checksum
//!
//! Steps 2-4 run concurrently, joined by bounded queues.

pub mod error;
pub mod pipeline;
pub mod service;
mod stages;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::UploadError;
pub use pipeline::ArchiveUploader;
pub use service::{ArchiveService, ServiceError, ServiceFuture};
pub use types::{PipelineLimits, UploadConfig, UploadEvent, UploadOutcome};
