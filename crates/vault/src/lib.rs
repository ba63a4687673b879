//! Filesystem-backed archive vault.
//!
//! [`DirectoryVault`] implements [`coldpush_upload::ArchiveService`] on top of
//! a local directory tree and enforces the same rules a remote vault does:
//! aligned part ranges, per-part checksums, contiguous parts on completion and
//! an independently recomputed archive checksum.
//!
//! Layout:
//!
//! ```text
//! <root>/<region>/<vault>/
//!     uploads/<upload_id>/data
//!     archives/<archive_id>
//!     archives/<archive_id>.json
//! ```

mod records;
mod vault;
mod verify;

pub use records::ArchiveRecord;
pub use vault::DirectoryVault;
