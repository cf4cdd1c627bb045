use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::client::{
    BlockStream, InstanceClient, ReadSessionClient, TableSessionClient, WriteSessionClient,
};
use crate::error::{ErrorKind, TunnelResult};
use crate::types::{
    BlockNumber, BlockOpenRequest, CommitMessage, InstanceId, InstanceRequest, PaginationMarker,
    ScanScope, SessionId, SessionKind, SessionStatus, Split, SplitPage, TableIdentifier,
    TableSession, TaskStatus, WriteSessionOptions, WriterAttemptId,
};

/// Page size used when the scan scope does not request one.
pub const DEFAULT_PAGE_SIZE: usize = 2;

type BlockKey = (SessionId, BlockNumber, WriterAttemptId);

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    tables: HashMap<TableIdentifier, Vec<Split>>,
    sessions: HashMap<SessionId, TableSession>,
    session_splits: HashMap<SessionId, Vec<Split>>,
    list_requests: Vec<Option<PaginationMarker>>,
    range_requests: Vec<(String, Option<String>)>,
    open_requests: Vec<BlockOpenRequest>,
    failing_opens: HashSet<(BlockNumber, WriterAttemptId)>,
    failing_finishes: HashSet<(BlockNumber, WriterAttemptId)>,
    received_blocks: HashMap<BlockKey, Vec<u8>>,
    aborted_blocks: Vec<(BlockNumber, WriterAttemptId)>,
    commits: Vec<(SessionId, Vec<CommitMessage>)>,
    instances: HashMap<InstanceId, InstanceRequest>,
    stopped_instances: HashSet<InstanceId>,
    channel_scripts: HashMap<String, VecDeque<Option<String>>>,
    channel_reads: HashMap<String, usize>,
    task_status_script: VecDeque<Option<TaskStatus>>,
    task_result: Option<String>,
    info_writes: Vec<(String, String)>,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn session(&self, session_id: &SessionId) -> TunnelResult<&TableSession> {
        match self.sessions.get(session_id) {
            Some(session) => Ok(session),
            None => bail!(
                ErrorKind::ServiceRequestFailed,
                "Table service returned an error",
                format!("status 404, code NoSuchSession: session {session_id} does not exist")
            ),
        }
    }
}

/// Scripted in-memory implementation of every client trait.
///
/// Splits are registered per table and paginated with [`DEFAULT_PAGE_SIZE`] unless the scope
/// asks for another page size. Block uploads are buffered and acknowledged with a token of the
/// form `token-{block}-{attempt}`. Interactive task info channels replay scripted payloads in
/// order and report "nothing yet" once a script is exhausted.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableService {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTableService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the splits of `table`, in the order the service hands them out.
    pub async fn add_splits(&self, table: &TableIdentifier, splits: Vec<Split>) {
        let mut inner = self.inner.lock().await;
        inner.tables.entry(table.clone()).or_default().extend(splits);
    }

    /// Makes opening the given block attempt fail with a transport fault.
    pub async fn fail_open(&self, block_number: BlockNumber, attempt: WriterAttemptId) {
        let mut inner = self.inner.lock().await;
        inner.failing_opens.insert((block_number, attempt));
    }

    /// Makes finalizing the given block attempt fail with a transport fault.
    pub async fn fail_finish(&self, block_number: BlockNumber, attempt: WriterAttemptId) {
        let mut inner = self.inner.lock().await;
        inner.failing_finishes.insert((block_number, attempt));
    }

    /// Queues payloads returned by successive reads of a task info channel.
    ///
    /// `None` entries simulate a channel with nothing to report yet.
    pub async fn script_channel<I>(&self, key: &str, payloads: I)
    where
        I: IntoIterator<Item = Option<String>>,
    {
        let mut inner = self.inner.lock().await;
        inner
            .channel_scripts
            .entry(key.to_string())
            .or_default()
            .extend(payloads);
    }

    /// Queues task run states. The last state is repeated once the script runs out.
    pub async fn script_task_status<I>(&self, statuses: I)
    where
        I: IntoIterator<Item = Option<TaskStatus>>,
    {
        let mut inner = self.inner.lock().await;
        inner.task_status_script.extend(statuses);
    }

    pub async fn set_task_result(&self, result: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.task_result = Some(result.into());
    }

    /// Markers supplied to every paginated split request, in order.
    pub async fn list_requests(&self) -> Vec<Option<PaginationMarker>> {
        self.inner.lock().await.list_requests.clone()
    }

    pub async fn range_requests(&self) -> Vec<(String, Option<String>)> {
        self.inner.lock().await.range_requests.clone()
    }

    pub async fn open_requests(&self) -> Vec<BlockOpenRequest> {
        self.inner.lock().await.open_requests.clone()
    }

    /// Bytes received for a block attempt whose stream was finalized.
    pub async fn received_block(
        &self,
        session_id: &SessionId,
        block_number: BlockNumber,
        attempt: WriterAttemptId,
    ) -> Option<Vec<u8>> {
        let inner = self.inner.lock().await;
        inner
            .received_blocks
            .get(&(session_id.clone(), block_number, attempt))
            .cloned()
    }

    pub async fn aborted_blocks(&self) -> Vec<(BlockNumber, WriterAttemptId)> {
        self.inner.lock().await.aborted_blocks.clone()
    }

    /// Commit calls received, with the messages each carried.
    pub async fn commits(&self) -> Vec<(SessionId, Vec<CommitMessage>)> {
        self.inner.lock().await.commits.clone()
    }

    pub async fn session(&self, session_id: &SessionId) -> Option<TableSession> {
        self.inner.lock().await.sessions.get(session_id).cloned()
    }

    /// Overrides the status the service reports for a session.
    pub async fn set_session_status(&self, session_id: &SessionId, status: SessionStatus) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.status = status;
        }
    }

    pub async fn instances(&self) -> Vec<(InstanceId, InstanceRequest)> {
        let inner = self.inner.lock().await;
        inner
            .instances
            .iter()
            .map(|(id, request)| (id.clone(), request.clone()))
            .collect()
    }

    pub async fn is_stopped(&self, instance: &InstanceId) -> bool {
        self.inner.lock().await.stopped_instances.contains(instance)
    }

    /// Number of reads issued against a task info channel.
    pub async fn read_count(&self, key: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.channel_reads.get(key).copied().unwrap_or(0)
    }

    /// Key-value pairs written to task info channels, in order.
    pub async fn info_writes(&self) -> Vec<(String, String)> {
        self.inner.lock().await.info_writes.clone()
    }

    async fn create_session(
        &self,
        table: &TableIdentifier,
        kind: SessionKind,
        splits: Vec<Split>,
    ) -> TableSession {
        let mut inner = self.inner.lock().await;
        let id = SessionId::new(inner.next_id("session"));
        let session = TableSession {
            id: id.clone(),
            table: table.clone(),
            kind,
            status: SessionStatus::Active,
            message: None,
            log_view: Some(format!("memory://logview/{id}")),
        };

        inner.sessions.insert(id.clone(), session.clone());
        inner.session_splits.insert(id, splits);

        session
    }
}

impl TableSessionClient for MemoryTableService {
    async fn get_session(
        &self,
        _table: &TableIdentifier,
        session_id: &SessionId,
        kind: SessionKind,
    ) -> TunnelResult<TableSession> {
        let inner = self.inner.lock().await;
        let session = inner.session(session_id)?;
        if session.kind != kind {
            bail!(
                ErrorKind::ServiceRequestFailed,
                "Table service returned an error",
                format!("status 400, code InvalidSessionType: session {session_id} is a {} session", session.kind)
            );
        }

        Ok(session.clone())
    }

    async fn cleanup_session(&self, session: &TableSession) -> TunnelResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(stored) = inner.sessions.get_mut(&session.id) {
            if !stored.status.is_terminal() {
                stored.status = SessionStatus::Terminated;
            }
        }

        Ok(())
    }
}

impl ReadSessionClient for MemoryTableService {
    async fn create_read_session(
        &self,
        table: &TableIdentifier,
        _scope: &ScanScope,
    ) -> TunnelResult<TableSession> {
        let splits = {
            let inner = self.inner.lock().await;
            inner.tables.get(table).cloned().unwrap_or_default()
        };

        Ok(self
            .create_session(table, SessionKind::BatchRead, splits)
            .await)
    }

    async fn list_splits(
        &self,
        session: &TableSession,
        scope: &ScanScope,
        marker: Option<&PaginationMarker>,
    ) -> TunnelResult<SplitPage> {
        let mut inner = self.inner.lock().await;
        inner.list_requests.push(marker.cloned());
        inner.session(&session.id)?;

        let offset = match marker {
            None => 0,
            Some(marker) => match marker.as_str().parse::<usize>() {
                Ok(offset) => offset,
                Err(_) => bail!(
                    ErrorKind::ServiceRequestFailed,
                    "Table service returned an error",
                    format!("status 400, code InvalidMarker: marker '{marker}' is not valid")
                ),
            },
        };

        let splits = inner
            .session_splits
            .get(&session.id)
            .cloned()
            .unwrap_or_default();
        let page_size = scope
            .page_size
            .map(|size| size as usize)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .max(1);
        let end = (offset + page_size).min(splits.len());
        let page = splits.get(offset..end).map(<[Split]>::to_vec).unwrap_or_default();

        let next_marker = if end >= splits.len() {
            PaginationMarker::default()
        } else {
            PaginationMarker::new(end.to_string())
        };

        debug!(session_id = %session.id, offset, end, "serving split page");

        Ok(SplitPage {
            splits: page,
            next_marker: Some(next_marker),
            max_items: Some(page_size as u32),
        })
    }

    async fn list_splits_in_range(
        &self,
        session: &TableSession,
        lower: &str,
        upper: Option<&str>,
    ) -> TunnelResult<Vec<Split>> {
        let mut inner = self.inner.lock().await;
        inner
            .range_requests
            .push((lower.to_string(), upper.map(str::to_string)));
        inner.session(&session.id)?;

        let splits = inner
            .session_splits
            .get(&session.id)
            .cloned()
            .unwrap_or_default();

        Ok(splits
            .into_iter()
            .filter(|split| split.key.as_str() >= lower)
            .filter(|split| upper.is_none_or(|upper| split.key.as_str() < upper))
            .collect())
    }
}

/// Upload stream buffering the bytes of one block attempt.
#[derive(Debug)]
pub struct MemoryBlockStream {
    service: MemoryTableService,
    key: BlockKey,
    buffer: Vec<u8>,
}

impl BlockStream for MemoryBlockStream {
    async fn send(&mut self, chunk: Bytes) -> TunnelResult<()> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self) -> TunnelResult<String> {
        let (session_id, block_number, attempt) = self.key;
        let mut inner = self.service.inner.lock().await;

        if inner.failing_finishes.contains(&(block_number, attempt)) {
            bail!(
                ErrorKind::ServiceRequestFailed,
                "Table service returned an error",
                format!("status 500, code InternalServerError: block {block_number} attempt {attempt} was not persisted")
            );
        }

        inner
            .received_blocks
            .insert((session_id, block_number, attempt), self.buffer);

        Ok(format!("token-{block_number}-{attempt}"))
    }

    async fn abort(self) {
        let (_, block_number, attempt) = self.key;
        let mut inner = self.service.inner.lock().await;
        inner.aborted_blocks.push((block_number, attempt));
    }
}

impl WriteSessionClient for MemoryTableService {
    type Stream = MemoryBlockStream;

    async fn create_write_session(
        &self,
        table: &TableIdentifier,
        _options: &WriteSessionOptions,
    ) -> TunnelResult<TableSession> {
        Ok(self
            .create_session(table, SessionKind::BatchWrite, vec![])
            .await)
    }

    async fn open_block(&self, request: &BlockOpenRequest) -> TunnelResult<Self::Stream> {
        let mut inner = self.inner.lock().await;
        inner.open_requests.push(request.clone());

        let session = inner.session(&request.session_id)?;
        if session.status.is_terminal() {
            bail!(
                ErrorKind::ServiceRequestFailed,
                "Table service returned an error",
                format!("status 409, code SessionClosed: session {} is {}", session.id, session.status)
            );
        }

        if inner
            .failing_opens
            .contains(&(request.block_number, request.attempt))
        {
            bail!(
                ErrorKind::ServiceConnectionFailed,
                "Could not reach the table service",
                format!("block {} attempt {} refused", request.block_number, request.attempt)
            );
        }

        Ok(MemoryBlockStream {
            service: self.clone(),
            key: (
                request.session_id.clone(),
                request.block_number,
                request.attempt,
            ),
            buffer: vec![],
        })
    }

    async fn commit_session(
        &self,
        session: &TableSession,
        messages: &[CommitMessage],
    ) -> TunnelResult<TableSession> {
        let mut inner = self.inner.lock().await;
        inner.commits.push((session.id.clone(), messages.to_vec()));

        for message in messages {
            let key = (session.id.clone(), message.block_number(), message.attempt());
            let expected = format!("token-{}-{}", message.block_number(), message.attempt());
            if !inner.received_blocks.contains_key(&key) || message.token() != expected {
                bail!(
                    ErrorKind::ServiceRequestFailed,
                    "Table service returned an error",
                    format!("status 400, code InvalidCommitMessage: block {} carries an unknown token", message.block_number())
                );
            }
        }

        let Some(stored) = inner.sessions.get_mut(&session.id) else {
            bail!(
                ErrorKind::ServiceRequestFailed,
                "Table service returned an error",
                format!("status 404, code NoSuchSession: session {} does not exist", session.id)
            );
        };
        stored.status = SessionStatus::Committed;

        Ok(stored.clone())
    }
}

impl InstanceClient for MemoryTableService {
    async fn create_instance(&self, request: &InstanceRequest) -> TunnelResult<InstanceId> {
        let mut inner = self.inner.lock().await;
        let id = InstanceId::new(request.project.clone(), inner.next_id("instance"));
        inner.instances.insert(id.clone(), request.clone());

        Ok(id)
    }

    async fn task_info(
        &self,
        instance: &InstanceId,
        _task_name: &str,
        key: &str,
    ) -> TunnelResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        if !inner.instances.contains_key(instance) {
            bail!(
                ErrorKind::ServiceRequestFailed,
                "Table service returned an error",
                format!("status 404, code NoSuchInstance: instance {instance} does not exist")
            );
        }

        *inner.channel_reads.entry(key.to_string()).or_default() += 1;

        let payload = inner
            .channel_scripts
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .flatten();

        Ok(payload)
    }

    async fn set_task_info(
        &self,
        _instance: &InstanceId,
        _task_name: &str,
        key: &str,
        value: &str,
    ) -> TunnelResult<String> {
        let mut inner = self.inner.lock().await;
        inner.info_writes.push((key.to_string(), value.to_string()));

        Ok(String::new())
    }

    async fn task_status(
        &self,
        instance: &InstanceId,
        _task_name: &str,
    ) -> TunnelResult<Option<TaskStatus>> {
        let mut inner = self.inner.lock().await;
        if inner.stopped_instances.contains(instance) {
            return Ok(Some(TaskStatus::Cancelled));
        }

        let status = if inner.task_status_script.len() > 1 {
            inner.task_status_script.pop_front().flatten()
        } else {
            inner.task_status_script.front().copied().flatten()
        };

        Ok(status)
    }

    async fn task_result(
        &self,
        _instance: &InstanceId,
        _task_name: &str,
    ) -> TunnelResult<Option<String>> {
        Ok(self.inner.lock().await.task_result.clone())
    }

    async fn stop_instance(&self, instance: &InstanceId) -> TunnelResult<()> {
        let mut inner = self.inner.lock().await;
        inner.stopped_instances.insert(instance.clone());

        Ok(())
    }

    async fn log_view(&self, instance: &InstanceId) -> TunnelResult<Option<String>> {
        Ok(Some(format!("memory://logview/{instance}")))
    }
}

/// Builds a task info payload with a status code and result text.
pub fn status_payload(code: i32, result: &str) -> Option<String> {
    Some(serde_json::json!({ "status": code, "result": result }).to_string())
}

/// Builds a launch progress payload reported while workers start.
pub fn progress_payload(code: i32, launched: u32, total: u32) -> Option<String> {
    let percentage = if total == 0 { 0 } else { launched * 100 / total };
    let progress = serde_json::json!({
        "totalWorkerCount": total,
        "launchedWorkerCount": launched,
        "launchedPercentage": percentage,
    });

    Some(serde_json::json!({ "status": code, "result": progress.to_string() }).to_string())
}

/// Splits keyed `0000`, `0001`, ... with locators `split-0`, `split-1`, ...
pub fn numbered_splits(count: usize) -> Vec<Split> {
    (0..count)
        .map(|index| Split::new(format!("{index:04}"), format!("split-{index}")))
        .collect()
}

/// Settings map built from string pairs.
pub fn settings<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
