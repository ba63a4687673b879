//! Upload coordinator.
//!
//! `ArchiveUploader` drives one upload through
//! Initiating → Transferring → Finalizing → Done (or Failed), running the
//! reader, checksum and upload stages concurrently during Transferring.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use coldpush_protocol::{
    AbortUploadRequest, CompleteUploadRequest, InitiateUploadRequest, TransferState,
};
use coldpush_transfer::{
    ArchiveChecksum, BufferPool, ChunkReader, UploadSession, effective_chunk_size,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::UploadError;
use crate::service::{ArchiveService, ServiceError};
use crate::stages::{self, SendSummary};
use crate::types::{PipelineLimits, UploadConfig, UploadEvent, UploadOutcome};

/// Capacity of the progress event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Uploads files as multipart archives through an [`ArchiveService`].
pub struct ArchiveUploader {
    service: Arc<dyn ArchiveService>,
    limits: PipelineLimits,
    cancel: CancellationToken,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl ArchiveUploader {
    pub fn new(service: Arc<dyn ArchiveService>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            service,
            limits: PipelineLimits::default(),
            cancel: CancellationToken::new(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Overrides queue and pool sizes.
    pub fn with_limits(mut self, limits: PipelineLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are dropped rather than delayed when nobody drains the channel.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Token that aborts any upload in progress when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads `config.source_path` and returns the new archive.
    ///
    /// Any failure after the session was opened triggers one best-effort
    /// abort so the service can discard the stored parts.
    pub async fn upload(&self, config: &UploadConfig) -> Result<UploadOutcome, UploadError> {
        config.validate().map_err(|e| self.fail(e))?;

        let path = config.source_path.clone();
        let (source, total_size) = tokio::task::spawn_blocking(move || open_source(&path))
            .await
            .map_err(|e| self.fail(join_error("open", e)))?
            .map_err(|e| self.fail(e))?;

        let chunk_size = effective_chunk_size(config.chunk_size, total_size);
        info!(
            endpoint = self.service.endpoint(),
            region = %config.region,
            vault = %config.vault_name,
            path = %config.source_path.display(),
            total_size,
            chunk_size,
            "starting archive upload"
        );

        self.emit_state(TransferState::Initiating);
        let session = self
            .initiate(config, chunk_size, total_size)
            .await
            .map_err(|e| self.fail(e))?;

        match self.run_session(&session, source).await {
            Ok(outcome) => {
                self.emit_state(TransferState::Done);
                self.emit(UploadEvent::Completed {
                    archive_id: outcome.archive_id.clone(),
                });
                info!(
                    archive_id = %outcome.archive_id,
                    checksum = %outcome.checksum,
                    parts = outcome.parts,
                    "archive upload complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.abort(&session).await;
                Err(self.fail(e))
            }
        }
    }

    async fn initiate(
        &self,
        config: &UploadConfig,
        chunk_size: usize,
        total_size: u64,
    ) -> Result<UploadSession, UploadError> {
        let request = InitiateUploadRequest {
            vault_name: config.vault_name.clone(),
            part_size: chunk_size as u64,
            description: config.description.clone(),
        };

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            res = self.service.initiate_upload(&request) => res.map_err(UploadError::Session)?,
        };
        if response.upload_id.is_empty() {
            return Err(UploadError::Session(ServiceError::InvalidRequest(
                "service returned an empty upload id".into(),
            )));
        }

        debug!(upload_id = %response.upload_id, location = %response.location, "upload session opened");
        Ok(UploadSession {
            upload_id: response.upload_id,
            vault_name: config.vault_name.clone(),
            chunk_size,
            total_size,
        })
    }

    async fn run_session(
        &self,
        session: &UploadSession,
        source: File,
    ) -> Result<UploadOutcome, UploadError> {
        self.emit_state(TransferState::Transferring);
        let (archive, sent) = self.transfer(session, source).await?;

        self.emit_state(TransferState::Finalizing);
        let request = CompleteUploadRequest {
            vault_name: session.vault_name.clone(),
            upload_id: session.upload_id.clone(),
            archive_size: archive.total_size,
            checksum: archive.root.to_hex(),
        };
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            res = self.service.complete_upload(&request) => res.map_err(UploadError::Completion)?,
        };

        Ok(UploadOutcome {
            archive_id: response.archive_id,
            location: response.location,
            checksum: archive.root,
            archive_size: archive.total_size,
            parts: sent.parts,
        })
    }

    /// Runs the three stages to completion and returns the archive checksum.
    async fn transfer(
        &self,
        session: &UploadSession,
        source: File,
    ) -> Result<(ArchiveChecksum, SendSummary), UploadError> {
        // Child token: a failed stage stops this run without poisoning the uploader.
        let cancel = self.cancel.child_token();
        let pool = Arc::new(BufferPool::new(
            session.chunk_size,
            self.limits.pool_capacity,
        ));
        let reader = ChunkReader::new(source, session.total_size, Arc::clone(&pool))
            .map_err(|e| UploadError::Configuration(e.to_string()))?;

        let (read_tx, read_rx) = mpsc::channel(self.limits.read_queue.max(1));
        let (upload_tx, upload_rx) = mpsc::channel(self.limits.upload_queue.max(1));
        let (archive_tx, archive_rx) = oneshot::channel();

        let reader_task = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || stages::read_stage(reader, read_tx, cancel)
        });
        let checksum_task = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            let total_size = session.total_size;
            move || stages::checksum_stage(read_rx, upload_tx, total_size, archive_tx, cancel)
        });
        let upload_task = tokio::spawn(stages::upload_stage(
            Arc::clone(&self.service),
            session.clone(),
            upload_rx,
            pool,
            self.events_tx.clone(),
            cancel.clone(),
        ));

        let (read_res, checksum_res, upload_res) =
            tokio::join!(reader_task, checksum_task, upload_task);
        let read_res = read_res.map_err(|e| join_error("reader", e)).and_then(|r| r);
        let checksum_res = checksum_res
            .map_err(|e| join_error("checksum", e))
            .and_then(|r| r);
        let upload_res = upload_res
            .map_err(|e| join_error("upload", e))
            .and_then(|r| r);

        let sent = match (read_res, checksum_res, upload_res) {
            (Ok(chunks), Ok(()), Ok(sent)) => {
                if chunks != sent.parts || sent.parts != session.part_count() {
                    return Err(UploadError::Internal(format!(
                        "read {chunks} chunks and sent {} parts, expected {}",
                        sent.parts,
                        session.part_count()
                    )));
                }
                sent
            }
            (r, c, u) => return Err(root_cause([r.err(), c.err(), u.err()])),
        };

        let archive = archive_rx.await.map_err(|_| {
            UploadError::Internal("checksum stage ended without an archive checksum".into())
        })?;
        if archive.total_size != session.total_size {
            return Err(UploadError::Internal(format!(
                "archive checksum covers {} bytes, source has {}",
                archive.total_size, session.total_size
            )));
        }
        Ok((archive, sent))
    }

    async fn abort(&self, session: &UploadSession) {
        let request = AbortUploadRequest {
            vault_name: session.vault_name.clone(),
            upload_id: session.upload_id.clone(),
        };
        match self.service.abort_upload(&request).await {
            Ok(()) => debug!(upload_id = %session.upload_id, "upload aborted"),
            Err(e) => warn!(upload_id = %session.upload_id, error = %e, "abort failed"),
        }
    }

    fn fail(&self, err: UploadError) -> UploadError {
        error!(stage = err.stage(), error = %err, "archive upload failed");
        self.emit_state(TransferState::Failed);
        self.emit(UploadEvent::Failed {
            error: err.to_string(),
        });
        err
    }

    fn emit_state(&self, state: TransferState) {
        debug!(%state, "transfer state");
        self.emit(UploadEvent::StateChanged(state));
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

/// First real failure in pipeline order; `Cancelled` only if nothing else failed.
fn root_cause(errors: [Option<UploadError>; 3]) -> UploadError {
    let mut cancelled = false;
    for err in errors.into_iter().flatten() {
        if err.is_cancelled() {
            cancelled = true;
        } else {
            return err;
        }
    }
    if cancelled {
        UploadError::Cancelled
    } else {
        UploadError::Internal("pipeline stopped without reporting an error".into())
    }
}

fn join_error(stage: &str, err: JoinError) -> UploadError {
    UploadError::Internal(format!("{stage} task failed: {err}"))
}

fn open_source(path: &Path) -> Result<(File, u64), UploadError> {
    let file = File::open(path).map_err(|e| {
        UploadError::Configuration(format!("cannot open {}: {e}", path.display()))
    })?;
    let meta = file.metadata().map_err(|e| {
        UploadError::Configuration(format!("cannot stat {}: {e}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(UploadError::Configuration(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok((file, meta.len()))
}
