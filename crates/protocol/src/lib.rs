//! Boundary types for the archive service's multipart upload protocol.
//!
//! The service addresses every transmitted part by an explicit inclusive
//! byte range, so these types carry no ordering assumptions of their own.

pub mod messages;
pub mod types;

pub use messages::{
    AbortUploadRequest, CompleteUploadRequest, CompleteUploadResponse, InitiateUploadRequest,
    InitiateUploadResponse, UploadPartRequest,
};
pub use types::{PartRange, TransferState};
