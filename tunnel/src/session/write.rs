use tracing::info;
use tunnel_config::shared::WriterConfig;

use crate::client::WriteSessionClient;
use crate::error::TunnelResult;
use crate::types::{BlockNumber, BlockOpenRequest, SessionKind, TableSession, WriterAttemptId};
use crate::write::{BatchCodec, BlockWriter, CommitCoordinator, RawBatchCodec};

/// Handle to a batch write session.
#[derive(Debug, Clone)]
pub struct WriteSession<C> {
    client: C,
    snapshot: TableSession,
    config: WriterConfig,
    stopped: bool,
}

impl<C> WriteSession<C>
where
    C: WriteSessionClient + Clone,
{
    pub(crate) fn new(client: C, snapshot: TableSession, config: WriterConfig) -> Self {
        Self {
            client,
            snapshot,
            config,
            stopped: false,
        }
    }

    /// The last fetched snapshot of the session.
    pub fn session(&self) -> &TableSession {
        &self.snapshot
    }

    /// Fetches a new snapshot of the session from the service.
    pub async fn refresh(&mut self) -> TunnelResult<&TableSession> {
        self.snapshot = self
            .client
            .get_session(&self.snapshot.table, &self.snapshot.id, SessionKind::BatchWrite)
            .await?;

        Ok(&self.snapshot)
    }

    /// Creates a writer for one attempt of `block_number` that streams pre-encoded batches.
    pub fn create_writer(
        &self,
        block_number: BlockNumber,
        attempt: WriterAttemptId,
    ) -> BlockWriter<C, RawBatchCodec> {
        self.create_writer_with_codec(block_number, attempt, RawBatchCodec)
    }

    /// Creates a writer for one attempt of `block_number` that encodes batches with `codec`.
    pub fn create_writer_with_codec<K>(
        &self,
        block_number: BlockNumber,
        attempt: WriterAttemptId,
        codec: K,
    ) -> BlockWriter<C, K>
    where
        K: BatchCodec,
    {
        let request = BlockOpenRequest {
            table: self.snapshot.table.clone(),
            session_id: self.snapshot.id.clone(),
            block_number,
            attempt,
            data_format: self.config.data_format,
        };

        BlockWriter::new(self.client.clone(), request, codec)
    }

    /// Returns an empty commit coordinator using the configured conflict policy.
    pub fn commit_coordinator(&self) -> CommitCoordinator {
        CommitCoordinator::new(self.config.commit_conflict_policy)
    }

    /// Finalizes the session with the messages collected by `coordinator`.
    ///
    /// Returns the snapshot the service reported after the commit.
    pub async fn commit(&mut self, coordinator: &CommitCoordinator) -> TunnelResult<&TableSession> {
        self.snapshot = coordinator.finalize(&self.client, &self.snapshot).await?;

        Ok(&self.snapshot)
    }

    /// Releases the session on the service. Only the first call reaches the service.
    pub async fn stop(&mut self) -> TunnelResult<()> {
        if self.stopped {
            return Ok(());
        }

        self.client.cleanup_session(&self.snapshot).await?;
        self.stopped = true;

        info!(session_id = %self.snapshot.id, table = %self.snapshot.table, "write session stopped");

        Ok(())
    }
}
