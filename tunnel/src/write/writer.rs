use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use tracing::{debug, info, warn};

use crate::bail;
use crate::client::{BlockStream, WriteSessionClient};
use crate::error::{ErrorKind, TunnelResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{BLOCK_WRITER_BEFORE_FINISH, BLOCK_WRITER_BEFORE_OPEN, tunnel_fail_point};
use crate::metrics::{
    SESSION_ID_LABEL, TUNNEL_BLOCKS_ABORTED_TOTAL, TUNNEL_BLOCKS_COMMITTED_TOTAL,
    TUNNEL_BYTES_WRITTEN_TOTAL, TUNNEL_RECORDS_WRITTEN_TOTAL,
};
use crate::types::{BlockNumber, BlockOpenRequest, CommitMessage, WriterAttemptId};
use crate::write::codec::BatchCodec;

/// Observable state of a [`BlockWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterPhase {
    /// Nothing was written and no stream is open.
    Idle,
    /// The block stream is open.
    Open,
    /// The writer was committed.
    Committed,
    /// The writer was aborted, explicitly or after a failure.
    Aborted,
}

enum WriterState<S> {
    Idle,
    Open(S),
    Committed,
    Aborted,
}

impl<S> WriterState<S> {
    fn phase(&self) -> WriterPhase {
        match self {
            WriterState::Idle => WriterPhase::Idle,
            WriterState::Open(_) => WriterPhase::Open,
            WriterState::Committed => WriterPhase::Committed,
            WriterState::Aborted => WriterPhase::Aborted,
        }
    }
}

/// Byte and record counters of a writer.
///
/// Clones share the counters, so a handle taken before commit keeps reporting the final values.
#[derive(Debug, Clone, Default)]
pub struct WriterMetrics {
    bytes: Arc<AtomicU64>,
    records: Arc<AtomicU64>,
}

impl WriterMetrics {
    pub fn bytes_written(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn records_written(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    fn record(&self, bytes: u64, records: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.records.fetch_add(records, Ordering::Relaxed);
    }
}

/// Streams one attempt of one block to a write session.
///
/// The block stream is opened by the first [`BlockWriter::write`]. [`BlockWriter::commit`]
/// finalizes the stream and returns the commit message that proves the block was received.
/// A writer that failed to finalize is aborted; retry the block with a new writer and the next
/// attempt id.
pub struct BlockWriter<C, K>
where
    C: WriteSessionClient,
{
    client: C,
    request: BlockOpenRequest,
    codec: K,
    state: WriterState<C::Stream>,
    metrics: WriterMetrics,
}

impl<C, K> BlockWriter<C, K>
where
    C: WriteSessionClient,
    K: BatchCodec,
{
    pub fn new(client: C, request: BlockOpenRequest, codec: K) -> Self {
        Self {
            client,
            request,
            codec,
            state: WriterState::Idle,
            metrics: WriterMetrics::default(),
        }
    }

    pub fn block_number(&self) -> BlockNumber {
        self.request.block_number
    }

    pub fn attempt(&self) -> WriterAttemptId {
        self.request.attempt
    }

    pub fn phase(&self) -> WriterPhase {
        self.state.phase()
    }

    /// Returns a handle to the counters of this writer.
    pub fn metrics(&self) -> WriterMetrics {
        self.metrics.clone()
    }

    /// Encodes `batch` and streams it, opening the block stream on first use.
    pub async fn write(&mut self, batch: &K::Batch) -> TunnelResult<()> {
        if matches!(self.state, WriterState::Committed | WriterState::Aborted) {
            bail!(
                ErrorKind::WriterClosed,
                "The writer is closed",
                format!(
                    "block {} attempt {} is {:?}",
                    self.request.block_number,
                    self.request.attempt,
                    self.phase()
                )
            );
        }

        let encoded = self.codec.encode(batch)?;

        if let WriterState::Idle = self.state {
            self.open().await?;
        }

        let WriterState::Open(stream) = &mut self.state else {
            bail!(ErrorKind::InvalidState, "The block stream is not open");
        };

        let bytes = encoded.bytes.len() as u64;
        let sent = stream.send(encoded.bytes).await;
        if let Err(err) = sent {
            warn!(
                session_id = %self.request.session_id,
                block = self.request.block_number,
                attempt = %self.request.attempt,
                error = %err,
                "streaming block data failed, aborting writer"
            );
            self.release().await;

            return Err(err);
        }

        self.metrics.record(bytes, encoded.record_count);
        counter!(TUNNEL_BYTES_WRITTEN_TOTAL, SESSION_ID_LABEL => self.request.session_id.to_string())
            .increment(bytes);
        counter!(TUNNEL_RECORDS_WRITTEN_TOTAL, SESSION_ID_LABEL => self.request.session_id.to_string())
            .increment(encoded.record_count);

        Ok(())
    }

    /// Finalizes the block.
    ///
    /// Returns `None` when nothing was ever written, in which case no stream was opened and the
    /// block contributes nothing to the session. Committing twice fails with
    /// [`ErrorKind::DuplicateCommit`].
    pub async fn commit(&mut self) -> TunnelResult<Option<CommitMessage>> {
        match mem::replace(&mut self.state, WriterState::Committed) {
            WriterState::Idle => {
                debug!(
                    session_id = %self.request.session_id,
                    block = self.request.block_number,
                    attempt = %self.request.attempt,
                    "committing empty block"
                );

                Ok(None)
            }
            WriterState::Committed => {
                bail!(
                    ErrorKind::DuplicateCommit,
                    "The writer was already committed",
                    format!(
                        "block {} attempt {}",
                        self.request.block_number, self.request.attempt
                    )
                );
            }
            WriterState::Aborted => {
                self.state = WriterState::Aborted;
                bail!(
                    ErrorKind::WriterClosed,
                    "The writer is closed",
                    format!(
                        "block {} attempt {} was aborted",
                        self.request.block_number, self.request.attempt
                    )
                );
            }
            WriterState::Open(stream) => self.finish(stream).await.map(Some),
        }
    }

    /// Releases the block stream without finalizing it.
    ///
    /// Safe to call in any state. Aborting a committed writer leaves it committed.
    pub async fn abort(&mut self) {
        if let WriterState::Committed = self.state {
            return;
        }

        self.release().await;
    }

    async fn open(&mut self) -> TunnelResult<()> {
        #[cfg(feature = "failpoints")]
        tunnel_fail_point(BLOCK_WRITER_BEFORE_OPEN)?;

        let stream = self.client.open_block(&self.request).await?;
        self.state = WriterState::Open(stream);

        debug!(
            session_id = %self.request.session_id,
            block = self.request.block_number,
            attempt = %self.request.attempt,
            data_format = %self.request.data_format.kind,
            "opened block stream"
        );

        Ok(())
    }

    async fn finish(&mut self, stream: C::Stream) -> TunnelResult<CommitMessage> {
        #[cfg(feature = "failpoints")]
        if let Err(err) = tunnel_fail_point(BLOCK_WRITER_BEFORE_FINISH) {
            stream.abort().await;
            self.mark_aborted();

            return Err(err);
        }

        match stream.finish().await {
            Ok(token) => {
                counter!(TUNNEL_BLOCKS_COMMITTED_TOTAL, SESSION_ID_LABEL => self.request.session_id.to_string())
                    .increment(1);
                info!(
                    session_id = %self.request.session_id,
                    block = self.request.block_number,
                    attempt = %self.request.attempt,
                    bytes = self.metrics.bytes_written(),
                    records = self.metrics.records_written(),
                    "block committed"
                );

                Ok(CommitMessage::new(
                    self.request.block_number,
                    self.request.attempt,
                    token,
                ))
            }
            Err(err) => {
                warn!(
                    session_id = %self.request.session_id,
                    block = self.request.block_number,
                    attempt = %self.request.attempt,
                    error = %err,
                    "finalizing block failed"
                );
                self.mark_aborted();

                Err(err)
            }
        }
    }

    async fn release(&mut self) {
        if let WriterState::Open(stream) = mem::replace(&mut self.state, WriterState::Aborted) {
            stream.abort().await;
            counter!(TUNNEL_BLOCKS_ABORTED_TOTAL, SESSION_ID_LABEL => self.request.session_id.to_string())
                .increment(1);
            debug!(
                session_id = %self.request.session_id,
                block = self.request.block_number,
                attempt = %self.request.attempt,
                "aborted block stream"
            );
        }
    }

    fn mark_aborted(&mut self) {
        self.state = WriterState::Aborted;
        counter!(TUNNEL_BLOCKS_ABORTED_TOTAL, SESSION_ID_LABEL => self.request.session_id.to_string())
            .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::client::WriteSessionClient;
    use crate::error::ErrorCategory;
    use crate::test_utils::memory::MemoryTableService;
    use crate::types::{DataFormat, TableIdentifier, TableSession, WriteSessionOptions};
    use crate::write::codec::{EncodedBatch, RawBatchCodec};

    async fn session(service: &MemoryTableService) -> TableSession {
        service
            .create_write_session(
                &TableIdentifier::new("analytics", "events"),
                &WriteSessionOptions::default(),
            )
            .await
            .unwrap()
    }

    fn writer(
        service: &MemoryTableService,
        session: &TableSession,
        block_number: BlockNumber,
        attempt: u32,
    ) -> BlockWriter<MemoryTableService, RawBatchCodec> {
        let request = BlockOpenRequest {
            table: session.table.clone(),
            session_id: session.id.clone(),
            block_number,
            attempt: WriterAttemptId::new(attempt),
            data_format: DataFormat::default(),
        };

        BlockWriter::new(service.clone(), request, RawBatchCodec)
    }

    fn batch(data: &'static [u8], records: u64) -> EncodedBatch {
        EncodedBatch::new(Bytes::from_static(data), records)
    }

    #[tokio::test]
    async fn stream_is_opened_lazily() {
        let service = MemoryTableService::new();
        let session = session(&service).await;
        let mut writer = writer(&service, &session, 0, 0);

        assert_eq!(writer.phase(), WriterPhase::Idle);
        assert!(service.open_requests().await.is_empty());

        writer.write(&batch(b"ab", 1)).await.unwrap();
        writer.write(&batch(b"cd", 2)).await.unwrap();

        assert_eq!(writer.phase(), WriterPhase::Open);
        assert_eq!(service.open_requests().await.len(), 1);

        let message = writer.commit().await.unwrap().unwrap();
        assert_eq!(message.block_number(), 0);
        assert_eq!(message.token(), "token-0-0");
        assert_eq!(
            service
                .received_block(&session.id, 0, WriterAttemptId::new(0))
                .await,
            Some(b"abcd".to_vec())
        );

        let metrics = writer.metrics();
        assert_eq!(metrics.bytes_written(), 4);
        assert_eq!(metrics.records_written(), 3);
    }

    #[tokio::test]
    async fn empty_writer_commits_nothing() {
        let service = MemoryTableService::new();
        let session = session(&service).await;
        let mut writer = writer(&service, &session, 3, 0);

        assert_eq!(writer.commit().await.unwrap(), None);
        assert_eq!(writer.phase(), WriterPhase::Committed);
        assert!(service.open_requests().await.is_empty());
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let service = MemoryTableService::new();
        let session = session(&service).await;

        let mut committed = writer(&service, &session, 0, 0);
        committed.write(&batch(b"a", 1)).await.unwrap();
        committed.commit().await.unwrap();

        let err = committed.write(&batch(b"b", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriterClosed);

        let mut aborted = writer(&service, &session, 1, 0);
        aborted.write(&batch(b"a", 1)).await.unwrap();
        aborted.abort().await;

        let err = aborted.write(&batch(b"b", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriterClosed);
        assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
        assert_eq!(
            service.aborted_blocks().await,
            vec![(1, WriterAttemptId::new(0))]
        );
    }

    #[tokio::test]
    async fn write_after_empty_commit_fails() {
        let service = MemoryTableService::new();
        let session = session(&service).await;
        let mut writer = writer(&service, &session, 2, 0);

        assert_eq!(writer.commit().await.unwrap(), None);
        assert_eq!(writer.phase(), WriterPhase::Committed);

        let err = writer.write(&batch(b"a", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriterClosed);
        assert_eq!(writer.phase(), WriterPhase::Committed);
        assert!(service.open_requests().await.is_empty());
    }

    #[tokio::test]
    async fn write_after_abort_without_open_fails() {
        let service = MemoryTableService::new();
        let session = session(&service).await;
        let mut writer = writer(&service, &session, 4, 1);

        writer.abort().await;
        assert_eq!(writer.phase(), WriterPhase::Aborted);

        let err = writer.write(&batch(b"a", 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriterClosed);
        assert_eq!(writer.phase(), WriterPhase::Aborted);
        assert!(service.open_requests().await.is_empty());
        assert!(service.aborted_blocks().await.is_empty());
    }

    #[tokio::test]
    async fn second_commit_is_a_duplicate() {
        let service = MemoryTableService::new();
        let session = session(&service).await;
        let mut writer = writer(&service, &session, 0, 0);

        writer.write(&batch(b"a", 1)).await.unwrap();
        writer.commit().await.unwrap();

        let err = writer.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateCommit);
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let service = MemoryTableService::new();
        let session = session(&service).await;
        let mut writer = writer(&service, &session, 0, 0);

        writer.abort().await;
        writer.abort().await;
        assert_eq!(writer.phase(), WriterPhase::Aborted);

        let err = writer.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriterClosed);
        assert!(service.aborted_blocks().await.is_empty());
    }

    #[tokio::test]
    async fn failed_finish_aborts_the_writer() {
        let service = MemoryTableService::new();
        let session = session(&service).await;
        service.fail_finish(0, WriterAttemptId::new(0)).await;

        let mut writer = writer(&service, &session, 0, 0);
        writer.write(&batch(b"a", 1)).await.unwrap();

        let err = writer.commit().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::TransportFault);
        assert_eq!(writer.phase(), WriterPhase::Aborted);
    }

    #[tokio::test]
    async fn failed_open_keeps_the_writer_idle() {
        let service = MemoryTableService::new();
        let session = session(&service).await;
        service.fail_open(0, WriterAttemptId::new(0)).await;

        let mut writer = writer(&service, &session, 0, 0);
        let err = writer.write(&batch(b"a", 1)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServiceConnectionFailed);
        assert_eq!(writer.phase(), WriterPhase::Idle);
        assert_eq!(writer.metrics().bytes_written(), 0);
    }
}
