//! The three concurrent pipeline stages.
//!
//! Reader and checksum stages do blocking file and CPU work and run on the
//! blocking pool; the upload stage is async. Every stage cancels the shared
//! token before it returns an error so its siblings stop too.

use std::io::Read;
use std::sync::Arc;

use coldpush_protocol::UploadPartRequest;
use coldpush_transfer::tree_hash;
use coldpush_transfer::{
    ArchiveChecksum, BufferPool, ChecksumAccumulator, Chunk, ChunkReader, TransferError,
    UploadSession,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::UploadError;
use crate::service::ArchiveService;
use crate::types::UploadEvent;

/// Parts and bytes the upload stage got accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SendSummary {
    pub parts: u64,
    pub bytes: u64,
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Splits the source into chunks and queues them in offset order.
///
/// Runs on a blocking thread. Returns the number of chunks produced.
pub(crate) fn read_stage<R: Read>(
    mut reader: ChunkReader<R>,
    tx: mpsc::Sender<Chunk>,
    cancel: CancellationToken,
) -> Result<u64, UploadError> {
    let mut produced = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let offset = reader.offset();
        let chunk = match reader.next_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(source) => {
                error!(offset, error = %source, "reading source failed");
                cancel.cancel();
                return Err(UploadError::SourceRead { offset, source });
            }
        };

        trace!(offset, length = chunk.length, "chunk read");
        // Fails only when the checksum stage is gone, which means it stopped.
        if tx.blocking_send(chunk).is_err() {
            cancel.cancel();
            return Err(UploadError::Cancelled);
        }
        produced += 1;
    }

    debug!(chunks = produced, "reader finished");
    Ok(produced)
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// Tree-hashes each chunk, accumulates the part hashes in offset order and
/// forwards the chunk to the sender.
///
/// Once the input ends cleanly the archive checksum is published on
/// `archive_tx` before the output queue closes.
pub(crate) fn checksum_stage(
    mut rx: mpsc::Receiver<Chunk>,
    tx: mpsc::Sender<Chunk>,
    expected_size: u64,
    archive_tx: oneshot::Sender<ArchiveChecksum>,
    cancel: CancellationToken,
) -> Result<(), UploadError> {
    let mut accumulator = ChecksumAccumulator::new();

    while let Some(mut chunk) = rx.blocking_recv() {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let hash = tree_hash::tree_hash(chunk.data());
        if let Err(e) = accumulator.push(chunk.offset, chunk.length as u64, hash) {
            error!(error = %e, "checksum stage received chunks out of order");
            cancel.cancel();
            return Err(UploadError::Internal(e.to_string()));
        }
        chunk.checksum = Some(hash);
        trace!(offset = chunk.offset, checksum = %hash, "chunk hashed");

        if tx.blocking_send(chunk).is_err() {
            cancel.cancel();
            return Err(UploadError::Cancelled);
        }
    }

    // Input closed: either the reader finished or it stopped early.
    if cancel.is_cancelled() {
        return Err(UploadError::Cancelled);
    }

    let accumulated = accumulator.bytes_accumulated();
    if accumulated != expected_size {
        let e = TransferError::SizeMismatch {
            expected: expected_size,
            actual: accumulated,
        };
        error!(error = %e, "checksum stage saw fewer bytes than the source holds");
        cancel.cancel();
        return Err(UploadError::Internal(e.to_string()));
    }

    let archive = accumulator.finish();
    debug!(
        parts = archive.part_hashes.len(),
        checksum = %archive.root,
        "archive checksum computed"
    );
    if archive_tx.send(archive).is_err() {
        cancel.cancel();
        return Err(UploadError::Cancelled);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Sends each hashed chunk to the service and returns its buffer to the pool.
pub(crate) async fn upload_stage(
    service: Arc<dyn ArchiveService>,
    session: UploadSession,
    mut rx: mpsc::Receiver<Chunk>,
    pool: Arc<BufferPool>,
    events: mpsc::Sender<UploadEvent>,
    cancel: CancellationToken,
) -> Result<SendSummary, UploadError> {
    let mut summary = SendSummary::default();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            next = rx.recv() => match next {
                Some(chunk) => chunk,
                None => break,
            },
        };

        let offset = chunk.offset;
        let length = chunk.length;
        let result = send_part(service.as_ref(), &session, &chunk, &cancel).await;
        pool.release(chunk.into_payload());

        match result {
            Ok(checksum) => {
                summary.parts += 1;
                summary.bytes += length as u64;
                debug!(offset, length, %checksum, "part uploaded");
                let _ = events.try_send(UploadEvent::PartUploaded {
                    offset,
                    length,
                    checksum,
                });
            }
            Err(e) => {
                if !e.is_cancelled() {
                    error!(offset, error = %e, "part upload failed");
                }
                cancel.cancel();
                return Err(e);
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(UploadError::Cancelled);
    }
    Ok(summary)
}

/// Sends one part, returning the hex checksum it was sent with.
async fn send_part(
    service: &dyn ArchiveService,
    session: &UploadSession,
    chunk: &Chunk,
    cancel: &CancellationToken,
) -> Result<String, UploadError> {
    let checksum = chunk.checksum.ok_or_else(|| {
        UploadError::Internal(format!(
            "chunk at offset {} reached the sender without a checksum",
            chunk.offset
        ))
    })?;
    let range = chunk.range().ok_or_else(|| {
        UploadError::Internal(format!("empty chunk at offset {}", chunk.offset))
    })?;

    let checksum = checksum.to_hex();
    let request = UploadPartRequest {
        vault_name: &session.vault_name,
        upload_id: &session.upload_id,
        range,
        checksum: &checksum,
        body: chunk.data(),
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        res = service.upload_part(request) => match res {
            Ok(()) => Ok(checksum),
            Err(source) => Err(UploadError::Transmission {
                offset: chunk.offset,
                source,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use coldpush_protocol::CompleteUploadRequest;

    use crate::test_support::MockService;

    const SAMPLE: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCD";

    fn chunk(offset: u64, data: &[u8]) -> Chunk {
        Chunk {
            offset,
            length: data.len(),
            payload: data.to_vec(),
            checksum: None,
        }
    }

    fn session(total_size: u64) -> UploadSession {
        UploadSession {
            upload_id: "upload-1".into(),
            vault_name: "photos".into(),
            chunk_size: 4,
            total_size,
        }
    }

    /// Counts every byte handed out by the wrapped source.
    struct Counting<R> {
        inner: R,
        read: Arc<AtomicU64>,
    }

    impl<R: Read> Read for Counting<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.read.fetch_add(n as u64, Ordering::SeqCst);
            Ok(n)
        }
    }

    struct BrokenSource;

    impl Read for BrokenSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk unplugged"))
        }
    }

    #[test]
    fn reader_emits_all_chunks_in_order() {
        let pool = Arc::new(BufferPool::new(4, 2));
        let reader = ChunkReader::new(Cursor::new(b"abcdefghij".to_vec()), 10, pool).unwrap();
        let (tx, mut rx) = mpsc::channel(8);

        let produced = read_stage(reader, tx, CancellationToken::new()).unwrap();
        assert_eq!(produced, 3);

        let mut offsets = Vec::new();
        while let Ok(c) = rx.try_recv() {
            offsets.push((c.offset, c.length));
        }
        assert_eq!(offsets, vec![(0, 4), (4, 4), (8, 2)]);
    }

    #[test]
    fn reader_failure_cancels_pipeline() {
        let pool = Arc::new(BufferPool::new(4, 2));
        let reader = ChunkReader::new(BrokenSource, 10, pool).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let err = read_stage(reader, tx, cancel.clone()).unwrap_err();
        assert!(matches!(err, UploadError::SourceRead { offset: 0, .. }));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn reader_stops_when_cancelled() {
        let pool = Arc::new(BufferPool::new(4, 2));
        let reader = ChunkReader::new(Cursor::new(vec![0u8; 10]), 10, pool).unwrap();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(read_stage(reader, tx, cancel).unwrap_err().is_cancelled());
    }

    #[test]
    fn checksum_stage_attaches_hashes_and_publishes_archive() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (archive_tx, mut archive_rx) = oneshot::channel();

        in_tx.try_send(chunk(0, b"abcd")).unwrap();
        in_tx.try_send(chunk(4, b"ef")).unwrap();
        drop(in_tx);

        checksum_stage(in_rx, out_tx, 6, archive_tx, CancellationToken::new()).unwrap();

        let first = out_rx.try_recv().unwrap();
        let second = out_rx.try_recv().unwrap();
        assert_eq!(first.checksum, Some(tree_hash::tree_hash(b"abcd")));
        assert_eq!(second.checksum, Some(tree_hash::tree_hash(b"ef")));

        let archive = archive_rx.try_recv().unwrap();
        assert_eq!(archive.total_size, 6);
        assert_eq!(
            archive.root,
            tree_hash::combine(&[
                tree_hash::tree_hash(b"abcd"),
                tree_hash::tree_hash(b"ef")
            ])
        );
    }

    #[test]
    fn checksum_stage_rejects_out_of_order_chunks() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (archive_tx, mut archive_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        in_tx.try_send(chunk(4, b"efgh")).unwrap();
        in_tx.try_send(chunk(0, b"abcd")).unwrap();
        drop(in_tx);

        let err = checksum_stage(in_rx, out_tx, 8, archive_tx, cancel.clone()).unwrap_err();
        assert!(matches!(err, UploadError::Internal(_)));
        assert!(cancel.is_cancelled());
        assert!(archive_rx.try_recv().is_err());
    }

    #[test]
    fn checksum_stage_detects_short_input() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (archive_tx, _archive_rx) = oneshot::channel();

        in_tx.try_send(chunk(0, b"abcd")).unwrap();
        drop(in_tx);

        let err = checksum_stage(in_rx, out_tx, 8, archive_tx, CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, UploadError::Internal(_)));
    }

    #[test]
    fn checksum_stage_does_not_publish_after_upstream_failure() {
        let (in_tx, in_rx) = mpsc::channel::<Chunk>(8);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (archive_tx, mut archive_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        cancel.cancel();
        drop(in_tx);

        let err = checksum_stage(in_rx, out_tx, 0, archive_tx, cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert!(archive_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn upload_stage_sends_parts_and_recycles_buffers() {
        let service = Arc::new(MockService::new());
        let pool = Arc::new(BufferPool::new(4, 4));
        let (tx, rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(16);

        for (offset, data) in [(0u64, b"abcd".as_slice()), (4, b"ef")] {
            let mut c = chunk(offset, data);
            c.payload.resize(4, 0);
            c.checksum = Some(tree_hash::tree_hash(data));
            tx.send(c).await.unwrap();
        }
        drop(tx);

        let summary = upload_stage(
            service.clone(),
            session(6),
            rx,
            Arc::clone(&pool),
            events_tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary, SendSummary { parts: 2, bytes: 6 });
        assert_eq!(pool.available(), 2);
        let parts = service.parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].range.to_string(), "bytes 4-5/*");
        assert_eq!(parts[1].body, b"ef");

        let mut uploaded = 0;
        while let Ok(UploadEvent::PartUploaded { .. }) = events_rx.try_recv() {
            uploaded += 1;
        }
        assert_eq!(uploaded, 2);
    }

    #[tokio::test]
    async fn upload_stage_requires_checksum() {
        let service = Arc::new(MockService::new());
        let pool = Arc::new(BufferPool::new(4, 4));
        let (tx, rx) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        tx.send(chunk(0, b"abcd")).await.unwrap();
        drop(tx);

        let err = upload_stage(service.clone(), session(4), rx, pool, events_tx, cancel.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Internal(_)));
        assert!(cancel.is_cancelled());
        assert!(service.parts().is_empty());
    }

    #[tokio::test]
    async fn upload_stage_failure_cancels_and_releases_buffer() {
        let service = Arc::new(MockService::new().fail_part(1));
        let pool = Arc::new(BufferPool::new(4, 4));
        let (tx, rx) = mpsc::channel(8);
        let (events_tx, _events_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let mut c = chunk(0, b"abcd");
        c.checksum = Some(tree_hash::tree_hash(b"abcd"));
        tx.send(c).await.unwrap();

        let err = upload_stage(service, session(8), rx, Arc::clone(&pool), events_tx, cancel.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transmission { offset: 0, .. }));
        assert!(cancel.is_cancelled());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn archive_checksum_holds_when_parts_arrive_reversed() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (archive_tx, archive_rx) = oneshot::channel();
        for (i, piece) in SAMPLE.chunks(16).enumerate() {
            in_tx.try_send(chunk(i as u64 * 16, piece)).unwrap();
        }
        drop(in_tx);

        tokio::task::spawn_blocking(move || {
            checksum_stage(in_rx, out_tx, 40, archive_tx, CancellationToken::new())
        })
        .await
        .unwrap()
        .unwrap();
        let archive = archive_rx.await.unwrap();

        let mut hashed = Vec::new();
        while let Ok(c) = out_rx.try_recv() {
            hashed.push(c);
        }
        hashed.reverse();

        let service = Arc::new(MockService::new());
        let (tx, rx) = mpsc::channel(8);
        for c in hashed {
            tx.send(c).await.unwrap();
        }
        drop(tx);
        let (events_tx, _events_rx) = mpsc::channel(16);
        upload_stage(
            service.clone(),
            session(40),
            rx,
            Arc::new(BufferPool::new(16, 4)),
            events_tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let arrival: Vec<u64> = service.parts().iter().map(|p| p.range.start).collect();
        assert_eq!(arrival, vec![32, 16, 0]);
        assert_eq!(
            archive.root.to_hex(),
            "7dd371d29f04f8106eca6b1cd82906373c05e18fe47a4b5229d4d7b41d443cea"
        );

        let request = CompleteUploadRequest {
            vault_name: "photos".into(),
            upload_id: "upload-1".into(),
            archive_size: 40,
            checksum: archive.root.to_hex(),
        };
        let response = service.complete_upload(&request).await.unwrap();
        assert_eq!(response.checksum, archive.root.to_hex());
    }

    #[tokio::test]
    async fn slow_service_bounds_how_far_the_reader_runs_ahead() {
        const READ_QUEUE: usize = 1;
        const UPLOAD_QUEUE: usize = 1;
        const CHUNK: u64 = 4;

        let read = Arc::new(AtomicU64::new(0));
        let source = Counting {
            inner: Cursor::new(vec![7u8; 400]),
            read: Arc::clone(&read),
        };
        let pool = Arc::new(BufferPool::new(CHUNK as usize, 1));
        let reader = ChunkReader::new(source, 400, Arc::clone(&pool)).unwrap();
        let service = Arc::new(MockService::new().with_part_delay(Duration::from_secs(30)));
        let cancel = CancellationToken::new();

        let (read_tx, read_rx) = mpsc::channel(READ_QUEUE);
        let (upload_tx, upload_rx) = mpsc::channel(UPLOAD_QUEUE);
        let (archive_tx, _archive_rx) = oneshot::channel();
        let (events_tx, _events_rx) = mpsc::channel(16);

        let reader_task = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || read_stage(reader, read_tx, cancel)
        });
        let checksum_task = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || checksum_stage(read_rx, upload_tx, 400, archive_tx, cancel)
        });
        let upload_task = tokio::spawn(upload_stage(
            service.clone(),
            session(400),
            upload_rx,
            pool,
            events_tx,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        // One chunk in each queue, one held by each stage.
        let limit = (READ_QUEUE + UPLOAD_QUEUE + 3) as u64 * CHUNK;
        let consumed = read.load(Ordering::SeqCst);
        assert!(consumed > 0);
        assert!(consumed <= limit, "read {consumed} bytes, limit {limit}");
        assert_eq!(service.part_calls(), 1);

        cancel.cancel();
        let (r, c, u) = tokio::join!(reader_task, checksum_task, upload_task);
        assert!(r.unwrap().unwrap_err().is_cancelled());
        assert!(c.unwrap().unwrap_err().is_cancelled());
        assert!(u.unwrap().unwrap_err().is_cancelled());
        assert!(service.parts().is_empty());
    }
}
