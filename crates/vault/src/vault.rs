use std::collections::{BTreeMap, HashMap};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::Utc;
use coldpush_protocol::{
    AbortUploadRequest, CompleteUploadRequest, CompleteUploadResponse, InitiateUploadRequest,
    InitiateUploadResponse, PartRange, UploadPartRequest,
};
use coldpush_transfer::{TreeHash, tree_hash, validate_vault_name};
use coldpush_upload::{ArchiveService, ServiceError, ServiceFuture};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::records::ArchiveRecord;
use crate::verify;

const UPLOADS_DIR: &str = "uploads";
const ARCHIVES_DIR: &str = "archives";
const DATA_FILE: &str = "data";

/// A part accepted into a pending upload.
#[derive(Debug, Clone, Copy)]
struct StoredPart {
    range: PartRange,
    checksum: TreeHash,
}

/// An initiated upload that has not been completed or aborted.
#[derive(Debug)]
struct PendingUpload {
    vault_name: String,
    description: String,
    part_size: u64,
    dir: PathBuf,
    /// Accepted parts keyed by first byte.
    parts: BTreeMap<u64, StoredPart>,
    /// Ranges reserved by part writes still in progress.
    in_flight: Vec<PartRange>,
    /// Set while `complete_upload` verifies and seals the data file.
    completing: bool,
}

/// Snapshot of an upload taken when completion starts.
struct Sealing {
    vault_name: String,
    description: String,
    part_size: u64,
    data: PathBuf,
    parts: Vec<StoredPart>,
}

/// Archive vaults stored under `<root>/<region>/`.
///
/// Pending uploads live in memory; their data is written to disk as parts
/// arrive. Completed archives are plain files plus a JSON record.
pub struct DirectoryVault {
    region: String,
    region_dir: PathBuf,
    endpoint: String,
    uploads: Mutex<HashMap<String, PendingUpload>>,
}

impl DirectoryVault {
    pub fn new(root: impl Into<PathBuf>, region: &str) -> Result<Self, ServiceError> {
        validate_vault_name(region)
            .map_err(|e| ServiceError::InvalidRequest(format!("invalid region: {e}")))?;
        let region_dir = root.into().join(region);
        let endpoint = format!("file://{}", region_dir.display());
        Ok(Self {
            region: region.to_string(),
            region_dir,
            endpoint,
            uploads: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding vault `name`. Does not check that it exists.
    pub fn vault_dir(&self, name: &str) -> PathBuf {
        self.region_dir.join(name)
    }

    /// Creates vault `name`. Creating an existing vault is a no-op.
    pub async fn create_vault(&self, name: &str) -> Result<PathBuf, ServiceError> {
        validate_vault_name(name).map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
        let dir = self.vault_dir(name);
        tokio::fs::create_dir_all(dir.join(UPLOADS_DIR)).await?;
        tokio::fs::create_dir_all(dir.join(ARCHIVES_DIR)).await?;
        info!(vault = name, path = %dir.display(), "vault ready");
        Ok(dir)
    }

    /// Path of a completed archive's data.
    pub fn archive_path(&self, vault_name: &str, archive_id: &str) -> PathBuf {
        self.vault_dir(vault_name).join(ARCHIVES_DIR).join(archive_id)
    }

    /// Loads the record written when `archive_id` was completed.
    pub async fn archive_record(
        &self,
        vault_name: &str,
        archive_id: &str,
    ) -> Result<ArchiveRecord, ServiceError> {
        validate_vault_name(vault_name).map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
        // Archive ids are always UUIDs; anything else cannot name a record.
        if Uuid::parse_str(archive_id).is_err() {
            return Err(ServiceError::NotFound(format!("archive {archive_id}")));
        }
        let path = self
            .archive_path(vault_name, archive_id)
            .with_extension("json");
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ServiceError::NotFound(format!("archive {archive_id}")));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| ServiceError::Io(io::Error::other(e)))
    }

    /// Number of uploads initiated but neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.uploads.lock().await.len()
    }

    async fn existing_vault(&self, name: &str) -> Result<PathBuf, ServiceError> {
        validate_vault_name(name).map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
        let dir = self.vault_dir(name);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            _ => Err(ServiceError::NotFound(format!(
                "vault {name} in region {}",
                self.region
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Protocol operations
    // -----------------------------------------------------------------------

    async fn initiate(
        &self,
        request: &InitiateUploadRequest,
    ) -> Result<InitiateUploadResponse, ServiceError> {
        let vault_dir = self.existing_vault(&request.vault_name).await?;
        if request.part_size == 0 {
            return Err(ServiceError::InvalidRequest(
                "part size must be greater than zero".into(),
            ));
        }

        let upload_id = Uuid::new_v4().to_string();
        let dir = vault_dir.join(UPLOADS_DIR).join(&upload_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::File::create(dir.join(DATA_FILE)).await?;

        self.uploads.lock().await.insert(
            upload_id.clone(),
            PendingUpload {
                vault_name: request.vault_name.clone(),
                description: request.description.clone(),
                part_size: request.part_size,
                dir,
                parts: BTreeMap::new(),
                in_flight: Vec::new(),
                completing: false,
            },
        );

        info!(
            vault = %request.vault_name,
            %upload_id,
            part_size = request.part_size,
            "multipart upload initiated"
        );
        Ok(InitiateUploadResponse {
            location: format!(
                "/{}/{}/multipart-uploads/{upload_id}",
                self.region, request.vault_name
            ),
            upload_id,
        })
    }

    async fn store_part(&self, request: UploadPartRequest<'_>) -> Result<(), ServiceError> {
        let range = request.range;
        if request.body.len() as u64 != range.len() {
            return Err(ServiceError::InvalidRange(format!(
                "body has {} bytes but {range} covers {}",
                request.body.len(),
                range.len()
            )));
        }

        let expected = TreeHash::from_hex(request.checksum)
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;
        let actual = tree_hash::tree_hash(request.body);
        if actual != expected {
            return Err(ServiceError::ChecksumMismatch {
                expected: request.checksum.to_string(),
                actual: actual.to_hex(),
            });
        }

        // Phase 1: validate and reserve the range, then release the lock.
        let data_path = {
            let mut uploads = self.uploads.lock().await;
            let upload = writable(&mut uploads, request.vault_name, request.upload_id)?;
            check_range(upload, &range)?;
            upload.in_flight.push(range);
            upload.dir.join(DATA_FILE)
        };

        // Phase 2: disk write without holding the lock.
        let written = write_at(&data_path, range.start, request.body).await;

        // Phase 3: release the reservation and record the part.
        let mut uploads = self.uploads.lock().await;
        let upload = pending(&mut uploads, request.vault_name, request.upload_id)?;
        upload.in_flight.retain(|r| *r != range);
        written?;
        upload.parts.insert(
            range.start,
            StoredPart {
                range,
                checksum: actual,
            },
        );
        debug!(upload_id = request.upload_id, %range, "part stored");
        Ok(())
    }

    async fn finish(
        &self,
        request: &CompleteUploadRequest,
    ) -> Result<CompleteUploadResponse, ServiceError> {
        let expected = TreeHash::from_hex(&request.checksum)
            .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;

        // Phase 1: check the parts and mark the upload as completing.
        let sealing = {
            let mut uploads = self.uploads.lock().await;
            let upload = writable(&mut uploads, &request.vault_name, &request.upload_id)?;
            if !upload.in_flight.is_empty() {
                return Err(ServiceError::InvalidRequest(format!(
                    "{} part writes still in progress",
                    upload.in_flight.len()
                )));
            }
            let parts = contiguous_parts(&upload.parts, request.archive_size)?;
            upload.completing = true;
            Sealing {
                vault_name: upload.vault_name.clone(),
                description: upload.description.clone(),
                part_size: upload.part_size,
                data: upload.dir.join(DATA_FILE),
                parts,
            }
        };

        // Phase 2: verify and store the archive without holding the lock.
        let sealed = self.seal(&sealing, request.archive_size, expected).await;

        // Phase 3: drop the upload on success, reopen it on failure.
        let mut uploads = self.uploads.lock().await;
        let (archive_id, computed) = match sealed {
            Ok(done) => done,
            Err(e) => {
                if let Some(upload) = uploads.get_mut(&request.upload_id) {
                    upload.completing = false;
                }
                return Err(e);
            }
        };
        if let Some(done) = uploads.remove(&request.upload_id) {
            if let Err(e) = tokio::fs::remove_dir_all(&done.dir).await {
                warn!(upload_id = %request.upload_id, error = %e, "could not clean up upload directory");
            }
        }
        drop(uploads);

        info!(
            vault = %request.vault_name,
            %archive_id,
            size = request.archive_size,
            checksum = %computed,
            "archive created"
        );
        Ok(CompleteUploadResponse {
            location: format!(
                "/{}/{}/archives/{archive_id}",
                self.region, request.vault_name
            ),
            archive_id,
            checksum: computed.to_hex(),
        })
    }

    /// Re-hashes the stored parts, then writes the record and moves the data
    /// file into `archives/`. Leaves the data file in place on any error.
    async fn seal(
        &self,
        sealing: &Sealing,
        archive_size: u64,
        expected: TreeHash,
    ) -> Result<(String, TreeHash), ServiceError> {
        let extents: Vec<(u64, u64)> = sealing
            .parts
            .iter()
            .map(|p| (p.range.start, p.range.len()))
            .collect();
        let rehashed = tokio::task::spawn_blocking({
            let data = sealing.data.clone();
            move || verify::rehash_parts(&data, &extents)
        })
        .await
        .map_err(|e| ServiceError::Io(io::Error::other(e)))??;

        for (part, hash) in sealing.parts.iter().zip(&rehashed) {
            if *hash != part.checksum {
                return Err(ServiceError::ChecksumMismatch {
                    expected: part.checksum.to_hex(),
                    actual: hash.to_hex(),
                });
            }
        }
        let computed = tree_hash::combine(&rehashed);
        if computed != expected {
            return Err(ServiceError::ChecksumMismatch {
                expected: expected.to_hex(),
                actual: computed.to_hex(),
            });
        }

        let archive_id = Uuid::new_v4().to_string();
        let archive_path = self.archive_path(&sealing.vault_name, &archive_id);
        let record_path = archive_path.with_extension("json");
        if let Some(parent) = archive_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let record = ArchiveRecord {
            archive_id: archive_id.clone(),
            vault_name: sealing.vault_name.clone(),
            description: sealing.description.clone(),
            size: archive_size,
            checksum: computed.to_hex(),
            part_size: sealing.part_size,
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&record).map_err(io::Error::other)?;
        tokio::fs::write(&record_path, json).await?;

        if let Err(e) = tokio::fs::rename(&sealing.data, &archive_path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&record_path).await {
                warn!(%archive_id, error = %cleanup, "could not remove orphaned archive record");
            }
            return Err(e.into());
        }
        Ok((archive_id, computed))
    }

    async fn discard(&self, request: &AbortUploadRequest) -> Result<(), ServiceError> {
        let mut uploads = self.uploads.lock().await;
        writable(&mut uploads, &request.vault_name, &request.upload_id)?;
        if let Some(upload) = uploads.remove(&request.upload_id) {
            match tokio::fs::remove_dir_all(&upload.dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(upload_id = %request.upload_id, "multipart upload aborted");
        Ok(())
    }
}

impl ArchiveService for DirectoryVault {
    fn initiate_upload<'a>(
        &'a self,
        request: &'a InitiateUploadRequest,
    ) -> ServiceFuture<'a, InitiateUploadResponse> {
        Box::pin(self.initiate(request))
    }

    fn upload_part<'a>(&'a self, request: UploadPartRequest<'a>) -> ServiceFuture<'a, ()> {
        Box::pin(self.store_part(request))
    }

    fn complete_upload<'a>(
        &'a self,
        request: &'a CompleteUploadRequest,
    ) -> ServiceFuture<'a, CompleteUploadResponse> {
        Box::pin(self.finish(request))
    }

    fn abort_upload<'a>(&'a self, request: &'a AbortUploadRequest) -> ServiceFuture<'a, ()> {
        Box::pin(self.discard(request))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn pending<'m>(
    uploads: &'m mut HashMap<String, PendingUpload>,
    vault_name: &str,
    upload_id: &str,
) -> Result<&'m mut PendingUpload, ServiceError> {
    match uploads.get_mut(upload_id) {
        Some(upload) if upload.vault_name == vault_name => Ok(upload),
        _ => Err(ServiceError::NotFound(format!(
            "upload {upload_id} in vault {vault_name}"
        ))),
    }
}

/// Like [`pending`], but refuses uploads that are being completed.
fn writable<'m>(
    uploads: &'m mut HashMap<String, PendingUpload>,
    vault_name: &str,
    upload_id: &str,
) -> Result<&'m mut PendingUpload, ServiceError> {
    let upload = pending(uploads, vault_name, upload_id)?;
    if upload.completing {
        return Err(ServiceError::InvalidRequest(format!(
            "upload {upload_id} is being completed"
        )));
    }
    Ok(upload)
}

async fn write_at(path: &Path, offset: u64, body: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(body).await?;
    file.flush().await
}

/// Alignment, size and overlap rules for a new part.
fn check_range(upload: &PendingUpload, range: &PartRange) -> Result<(), ServiceError> {
    if range.start % upload.part_size != 0 {
        return Err(ServiceError::InvalidRange(format!(
            "{range} is not aligned to the part size {}",
            upload.part_size
        )));
    }
    if range.len() > upload.part_size {
        return Err(ServiceError::InvalidRange(format!(
            "{range} is longer than the part size {}",
            upload.part_size
        )));
    }
    // Re-sending the exact same range replaces it.
    if let Some(clash) = upload
        .parts
        .values()
        .find(|p| p.range.overlaps(range) && p.range != *range)
    {
        return Err(ServiceError::InvalidRange(format!(
            "{range} overlaps stored part {}",
            clash.range
        )));
    }
    if let Some(busy) = upload.in_flight.iter().find(|r| r.overlaps(range)) {
        return Err(ServiceError::InvalidRange(format!(
            "{range} overlaps part {busy} still being written"
        )));
    }
    Ok(())
}

/// Stored parts in offset order, provided they cover `0..archive_size`
/// without gaps.
fn contiguous_parts(
    parts: &BTreeMap<u64, StoredPart>,
    archive_size: u64,
) -> Result<Vec<StoredPart>, ServiceError> {
    let mut next = 0u64;
    for (&start, part) in parts {
        if start != next {
            return Err(ServiceError::MissingParts(format!(
                "no part starts at byte {next}"
            )));
        }
        next = part.range.end_exclusive();
    }
    if next != archive_size {
        return Err(ServiceError::MissingParts(format!(
            "parts cover {next} bytes, archive size is {archive_size}"
        )));
    }
    Ok(parts.values().copied().collect())
}
