use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bail;
use crate::client::InstanceClient;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, TunnelResult};
use crate::interactive::channel::{QUERY_CHANNEL, SQL_STATS_CHANNEL, STATUS_CHANNEL};
use crate::interactive::{QueryResults, TaskChannel};
use crate::tunnel_error;
use crate::types::{InstanceId, ObjectStatus, SessionProgress};

/// Lifecycle of an interactive session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No instance was created yet.
    #[default]
    NotStarted,
    /// The instance exists and its workers are launching.
    Starting,
    /// The session accepts queries.
    Running,
    Terminated,
    Failed,
    Cancelled,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Terminated | SessionPhase::Failed | SessionPhase::Cancelled
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::NotStarted => "not started",
            SessionPhase::Starting => "starting",
            SessionPhase::Running => "running",
            SessionPhase::Terminated => "terminated",
            SessionPhase::Failed => "failed",
            SessionPhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    settings: &'a BTreeMap<String, String>,
}

/// A SQL session hosted by a task on a service instance.
///
/// Created through the session coordinator in the [`SessionPhase::Starting`] phase. Start-up is
/// observed by polling: [`InteractiveSession::is_started`] checks once,
/// [`InteractiveSession::wait_for_start`] polls until the session runs or a deadline passes.
#[derive(Debug)]
pub struct InteractiveSession<C> {
    channel: TaskChannel<C>,
    name: Option<String>,
    poll_interval: Duration,
    shutdown_rx: ShutdownRx,
    phase: SessionPhase,
    progress: Option<SessionProgress>,
    start_message: String,
    log_view: Option<String>,
    stopped: bool,
}

impl<C> InteractiveSession<C>
where
    C: InstanceClient + Clone,
{
    pub(crate) fn new(
        channel: TaskChannel<C>,
        name: Option<String>,
        poll_interval: Duration,
        shutdown_rx: ShutdownRx,
        log_view: Option<String>,
    ) -> Self {
        Self {
            channel,
            name,
            poll_interval,
            shutdown_rx,
            phase: SessionPhase::Starting,
            progress: None,
            start_message: String::new(),
            log_view,
            stopped: false,
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        self.channel.instance()
    }

    /// Session name, or the name of the shared session for attached sessions.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn task_name(&self) -> &str {
        self.channel.task_name()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Messages the service reported while the session started, concatenated.
    pub fn start_message(&self) -> &str {
        &self.start_message
    }

    pub fn log_view(&self) -> Option<&str> {
        self.log_view.as_deref()
    }

    /// Reads the status channel once and returns whether the session runs.
    ///
    /// Launch progress reported while starting is kept and available through
    /// [`InteractiveSession::start_progress`]. A failed, terminated or cancelled start fails with
    /// [`ErrorKind::SessionFailed`].
    pub async fn is_started(&mut self) -> TunnelResult<bool> {
        match self.phase {
            SessionPhase::Running => return Ok(true),
            phase if phase.is_terminal() => {
                bail!(
                    ErrorKind::SessionFailed,
                    "The interactive session is not running",
                    format!("Session[{}] is {phase}", self.session_label())
                );
            }
            _ => {}
        }

        let response = self.channel.read_channel(STATUS_CHANNEL).await?;
        let Some((status, response)) =
            response.and_then(|response| response.status.map(|status| (status, response)))
        else {
            if let Err(err) = self.channel.ensure_task_alive().await {
                if err.kind() == ErrorKind::SessionFailed {
                    self.phase = SessionPhase::Failed;
                }

                return Err(err);
            }

            return Ok(false);
        };

        let result = response.non_empty_result();
        match status {
            ObjectStatus::Running => {
                self.phase = SessionPhase::Running;
                if let Some(result) = result {
                    self.start_message.push_str(result);
                }

                info!(
                    instance_id = %self.channel.instance(),
                    session = %self.session_label(),
                    "interactive session started"
                );

                Ok(true)
            }
            ObjectStatus::Failed | ObjectStatus::Terminated | ObjectStatus::Cancelled => {
                self.phase = match status {
                    ObjectStatus::Terminated => SessionPhase::Terminated,
                    ObjectStatus::Cancelled => SessionPhase::Cancelled,
                    _ => SessionPhase::Failed,
                };

                bail!(
                    ErrorKind::SessionFailed,
                    "Starting the interactive session failed",
                    format!(
                        "Start session[{}] {status}: {}",
                        self.session_label(),
                        result.unwrap_or_default()
                    )
                );
            }
            ObjectStatus::Other(code) => {
                if let Some(result) = result {
                    let progress: SessionProgress =
                        serde_json::from_str(result).map_err(|err| {
                            tunnel_error!(
                                ErrorKind::DeserializationError,
                                "Parsing the session launch progress failed",
                                format!("response message: {result}"),
                                source: err
                            )
                        })?;

                    debug!(
                        instance_id = %self.channel.instance(),
                        code,
                        launched = progress.launched_worker_count,
                        total = progress.total_worker_count,
                        percentage = progress.launched_percentage,
                        "interactive session launching"
                    );
                    self.progress = Some(progress);
                }

                Ok(false)
            }
        }
    }

    /// Reads the status channel every poll interval until the session runs or `timeout` passes.
    ///
    /// A zero `timeout` waits without a deadline. Returns whether the session started. Fails
    /// with [`ErrorKind::Interrupted`] if shutdown is signalled while waiting.
    pub async fn wait_for_start(&mut self, timeout: Duration) -> TunnelResult<bool> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            if self.is_started().await? {
                return Ok(true);
            }

            let delay = match deadline {
                None => self.poll_interval,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(
                            instance_id = %self.channel.instance(),
                            ?timeout,
                            "interactive session did not start in time"
                        );

                        return Ok(false);
                    }

                    self.poll_interval.min(deadline - now)
                }
            };

            if self.shutdown_rx.sleep(delay).await.should_shutdown() {
                bail!(
                    ErrorKind::Interrupted,
                    "Interrupted while waiting for the session to start",
                    format!("session {}", self.session_label())
                );
            }
        }
    }

    /// Returns the last launch progress, probing once if none was observed yet.
    pub async fn start_progress(&mut self) -> TunnelResult<Option<SessionProgress>> {
        if self.progress.is_none() && self.phase == SessionPhase::Starting {
            self.is_started().await?;
        }

        Ok(self.progress)
    }

    /// Submits `sql` and returns the sequence of its results.
    ///
    /// `settings` apply to this query only.
    pub async fn run(
        &self,
        sql: &str,
        settings: &BTreeMap<String, String>,
    ) -> TunnelResult<QueryResults<C>> {
        let request = serde_json::to_string(&QueryRequest {
            query: sql,
            settings,
        })?;
        self.channel.send(QUERY_CHANNEL, &request).await?;

        info!(
            instance_id = %self.channel.instance(),
            session = %self.session_label(),
            "submitted query"
        );

        Ok(QueryResults::new(
            self.channel.clone(),
            self.poll_interval,
            self.shutdown_rx.clone(),
        ))
    }

    /// Reads the result text of the info channel `key`.
    pub async fn information(&self, key: &str) -> TunnelResult<Option<String>> {
        let response = self.channel.read_channel(key).await?;

        Ok(response.and_then(|response| response.result))
    }

    /// Writes `value` to the info channel `key` and returns the service reply.
    pub async fn set_information(&self, key: &str, value: &str) -> TunnelResult<String> {
        self.channel.send(key, value).await
    }

    /// Execution statistics of the last query.
    pub async fn query_stats(&self) -> TunnelResult<Option<String>> {
        self.information(SQL_STATS_CHANNEL).await
    }

    /// Stops the instance hosting the session.
    ///
    /// Safe to call in any phase; only the first call reaches the service.
    pub async fn stop(&mut self) -> TunnelResult<()> {
        if self.stopped {
            return Ok(());
        }

        self.channel
            .client()
            .stop_instance(self.channel.instance())
            .await?;
        self.stopped = true;

        if !self.phase.is_terminal() {
            self.phase = SessionPhase::Cancelled;
        }

        info!(instance_id = %self.channel.instance(), "interactive session stopped");

        Ok(())
    }

    fn session_label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.channel.instance().to_string(),
        }
    }
}
