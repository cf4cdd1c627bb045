use std::future::Future;

use bytes::Bytes;

use crate::error::TunnelResult;
use crate::types::{
    BlockOpenRequest, CommitMessage, InstanceId, InstanceRequest, PaginationMarker, ScanScope,
    SessionId, SessionKind, Split, SplitPage, TableIdentifier, TableSession, TaskStatus,
    WriteSessionOptions,
};

/// Session operations shared by the read and write protocols.
pub trait TableSessionClient: Send + Sync {
    /// Fetches a fresh snapshot of an existing session.
    fn get_session(
        &self,
        table: &TableIdentifier,
        session_id: &SessionId,
        kind: SessionKind,
    ) -> impl Future<Output = TunnelResult<TableSession>> + Send;

    /// Releases the server-side resources of a session.
    ///
    /// Cleaning up a session that is already gone must succeed.
    fn cleanup_session(&self, session: &TableSession)
    -> impl Future<Output = TunnelResult<()>> + Send;
}

/// Client side of the batch read protocol.
pub trait ReadSessionClient: TableSessionClient {
    fn create_read_session(
        &self,
        table: &TableIdentifier,
        scope: &ScanScope,
    ) -> impl Future<Output = TunnelResult<TableSession>> + Send;

    /// Fetches one page of splits.
    ///
    /// The first page is requested without a marker; every later page with the marker returned
    /// by the page before it.
    fn list_splits(
        &self,
        session: &TableSession,
        scope: &ScanScope,
        marker: Option<&PaginationMarker>,
    ) -> impl Future<Output = TunnelResult<SplitPage>> + Send;

    /// Fetches every split between `lower` and the optional `upper` key in one page.
    fn list_splits_in_range(
        &self,
        session: &TableSession,
        lower: &str,
        upper: Option<&str>,
    ) -> impl Future<Output = TunnelResult<Vec<Split>>> + Send;
}

/// An open upload stream for one attempt of one block.
pub trait BlockStream: Send {
    /// Streams a chunk of encoded block data.
    fn send(&mut self, chunk: Bytes) -> impl Future<Output = TunnelResult<()>> + Send;

    /// Closes the stream and waits for the service acknowledgement.
    ///
    /// Returns the opaque commit token issued for the block.
    fn finish(self) -> impl Future<Output = TunnelResult<String>> + Send;

    /// Drops the stream without finalizing it.
    fn abort(self) -> impl Future<Output = ()> + Send;
}

/// Client side of the batch write protocol.
pub trait WriteSessionClient: TableSessionClient {
    type Stream: BlockStream;

    fn create_write_session(
        &self,
        table: &TableIdentifier,
        options: &WriteSessionOptions,
    ) -> impl Future<Output = TunnelResult<TableSession>> + Send;

    /// Opens the upload stream of a block.
    fn open_block(
        &self,
        request: &BlockOpenRequest,
    ) -> impl Future<Output = TunnelResult<Self::Stream>> + Send;

    /// Finalizes a write session with the commit messages of every block to publish.
    fn commit_session(
        &self,
        session: &TableSession,
        messages: &[CommitMessage],
    ) -> impl Future<Output = TunnelResult<TableSession>> + Send;
}

/// Client side of the instances that host interactive sessions.
pub trait InstanceClient: Send + Sync {
    fn create_instance(
        &self,
        request: &InstanceRequest,
    ) -> impl Future<Output = TunnelResult<InstanceId>> + Send;

    /// Reads a task info channel.
    ///
    /// Returns `None` when the channel has nothing to report yet. An empty body is treated the
    /// same way.
    fn task_info(
        &self,
        instance: &InstanceId,
        task_name: &str,
        key: &str,
    ) -> impl Future<Output = TunnelResult<Option<String>>> + Send;

    /// Writes a task info channel and returns the service reply.
    fn set_task_info(
        &self,
        instance: &InstanceId,
        task_name: &str,
        key: &str,
        value: &str,
    ) -> impl Future<Output = TunnelResult<String>> + Send;

    /// Returns the run state of a task, or `None` if the service does not report it yet.
    fn task_status(
        &self,
        instance: &InstanceId,
        task_name: &str,
    ) -> impl Future<Output = TunnelResult<Option<TaskStatus>>> + Send;

    /// Returns the result text of a task, if any.
    fn task_result(
        &self,
        instance: &InstanceId,
        task_name: &str,
    ) -> impl Future<Output = TunnelResult<Option<String>>> + Send;

    /// Stops an instance. Stopping an instance that already ended must succeed.
    fn stop_instance(&self, instance: &InstanceId) -> impl Future<Output = TunnelResult<()>> + Send;

    /// Returns a log view link for the instance when the deployment provides one.
    fn log_view(
        &self,
        instance: &InstanceId,
    ) -> impl Future<Output = TunnelResult<Option<String>>> + Send {
        let _ = instance;
        async { Ok(None) }
    }
}
