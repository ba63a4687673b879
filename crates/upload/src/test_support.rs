//! In-memory archive service for pipeline tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use coldpush_protocol::{
    AbortUploadRequest, CompleteUploadRequest, CompleteUploadResponse, InitiateUploadRequest,
    InitiateUploadResponse, PartRange, UploadPartRequest,
};
use coldpush_transfer::tree_hash;

use crate::service::{ArchiveService, ServiceError, ServiceFuture};

#[derive(Debug, Clone)]
pub(crate) struct RecordedPart {
    pub range: PartRange,
    pub checksum: String,
    pub body: Vec<u8>,
}

/// Verifies checksums like a real vault and records every call.
#[derive(Default)]
pub(crate) struct MockService {
    fail_initiate: bool,
    fail_part: Option<usize>,
    fail_complete: bool,
    part_delay: Option<Duration>,
    part_calls: AtomicUsize,
    initiated: Mutex<Vec<InitiateUploadRequest>>,
    parts: Mutex<Vec<RecordedPart>>,
    completed: Mutex<Vec<CompleteUploadRequest>>,
    aborted: Mutex<Vec<String>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_initiate(mut self) -> Self {
        self.fail_initiate = true;
        self
    }

    /// Fails the `n`th `upload_part` call (1-based).
    pub fn fail_part(mut self, n: usize) -> Self {
        self.fail_part = Some(n);
        self
    }

    pub fn fail_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    pub fn initiated(&self) -> Vec<InitiateUploadRequest> {
        self.initiated.lock().unwrap().clone()
    }

    pub fn parts(&self) -> Vec<RecordedPart> {
        self.parts.lock().unwrap().clone()
    }

    pub fn part_calls(&self) -> usize {
        self.part_calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<CompleteUploadRequest> {
        self.completed.lock().unwrap().clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    /// Aggregate checksum of the stored parts, ordered by offset.
    fn stored_checksum(&self) -> Result<(u64, String), ServiceError> {
        let mut parts = self.parts();
        parts.sort_by_key(|p| p.range.start);
        let mut next = 0u64;
        for p in &parts {
            if p.range.start != next {
                return Err(ServiceError::MissingParts(format!("gap at byte {next}")));
            }
            next = p.range.end_exclusive();
        }
        let hashes: Vec<_> = parts
            .iter()
            .map(|p| tree_hash::tree_hash(&p.body))
            .collect();
        Ok((next, tree_hash::combine(&hashes).to_hex()))
    }
}

impl ArchiveService for MockService {
    fn initiate_upload<'a>(
        &'a self,
        request: &'a InitiateUploadRequest,
    ) -> ServiceFuture<'a, InitiateUploadResponse> {
        Box::pin(async move {
            if self.fail_initiate {
                return Err(ServiceError::NotFound(format!(
                    "vault {}",
                    request.vault_name
                )));
            }
            self.initiated.lock().unwrap().push(request.clone());
            Ok(InitiateUploadResponse {
                upload_id: "mock-upload".into(),
                location: format!("/vaults/{}/multipart-uploads/mock-upload", request.vault_name),
            })
        })
    }

    fn upload_part<'a>(&'a self, request: UploadPartRequest<'a>) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let call = self.part_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.part_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_part == Some(call) {
                return Err(ServiceError::Transport("connection reset".into()));
            }
            if request.range.len() != request.body.len() as u64 {
                return Err(ServiceError::InvalidRange(request.range.to_string()));
            }
            let actual = tree_hash::tree_hash(request.body).to_hex();
            if actual != request.checksum {
                return Err(ServiceError::ChecksumMismatch {
                    expected: request.checksum.to_string(),
                    actual,
                });
            }
            self.parts.lock().unwrap().push(RecordedPart {
                range: request.range,
                checksum: request.checksum.to_string(),
                body: request.body.to_vec(),
            });
            Ok(())
        })
    }

    fn complete_upload<'a>(
        &'a self,
        request: &'a CompleteUploadRequest,
    ) -> ServiceFuture<'a, CompleteUploadResponse> {
        Box::pin(async move {
            self.completed.lock().unwrap().push(request.clone());
            if self.fail_complete {
                return Err(ServiceError::Transport("gateway timeout".into()));
            }
            let (size, checksum) = self.stored_checksum()?;
            if size != request.archive_size {
                return Err(ServiceError::MissingParts(format!(
                    "stored {size} bytes, archive is {}",
                    request.archive_size
                )));
            }
            if checksum != request.checksum {
                return Err(ServiceError::ChecksumMismatch {
                    expected: request.checksum.clone(),
                    actual: checksum,
                });
            }
            Ok(CompleteUploadResponse {
                archive_id: "mock-archive".into(),
                location: format!("/vaults/{}/archives/mock-archive", request.vault_name),
                checksum,
            })
        })
    }

    fn abort_upload<'a>(&'a self, request: &'a AbortUploadRequest) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            self.aborted.lock().unwrap().push(request.upload_id.clone());
            Ok(())
        })
    }

    fn endpoint(&self) -> &str {
        "mock://vault"
    }
}
