use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{info, warn};
use tunnel_config::shared::{ConsoleConfig, PollConfig, WriterConfig};

use crate::client::{InstanceClient, ReadSessionClient, WriteSessionClient};
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::TunnelResult;
use crate::interactive::{InteractiveSession, InteractiveSessionOptions, TaskChannel};
use crate::session::{ReadSession, WriteSession};
use crate::types::{
    InstanceRequest, ScanScope, SessionId, SessionKind, TableIdentifier, WriteSessionOptions,
};

/// Entry point for every kind of session.
///
/// Holds the client, the default project and the poll and writer configuration. Poll loops of
/// interactive sessions created here are interrupted by [`SessionCoordinator::shutdown_tx`].
#[derive(Debug)]
pub struct SessionCoordinator<C> {
    client: C,
    project: String,
    schema: String,
    poll: PollConfig,
    writer: WriterConfig,
    shutdown_tx: ShutdownTx,
}

impl<C> SessionCoordinator<C>
where
    C: Clone,
{
    /// Creates a coordinator with default poll and writer configuration.
    pub fn new(client: C, project: impl Into<String>) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            client,
            project: project.into(),
            schema: crate::types::DEFAULT_SCHEMA.to_string(),
            poll: PollConfig::default(),
            writer: WriterConfig::default(),
            shutdown_tx,
        }
    }

    /// Creates a coordinator from a loaded configuration.
    pub fn from_config(client: C, config: &ConsoleConfig) -> TunnelResult<Self> {
        config.validate()?;

        let mut coordinator = Self::new(client, config.service.project.clone())
            .with_poll_config(config.poll.clone())
            .with_writer_config(config.writer.clone());
        coordinator.schema = config.service.schema.clone();

        Ok(coordinator)
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_writer_config(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Returns the sender that interrupts the poll loops of this coordinator's sessions.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Identifier of `table` in the default project and schema.
    pub fn table(&self, table: impl Into<String>) -> TableIdentifier {
        TableIdentifier::with_schema(self.project.clone(), self.schema.clone(), table)
    }
}

impl<C> SessionCoordinator<C>
where
    C: ReadSessionClient + Clone,
{
    pub async fn create_read_session(
        &self,
        table: &TableIdentifier,
        scope: ScanScope,
    ) -> TunnelResult<ReadSession<C>> {
        let session = self.client.create_read_session(table, &scope).await?;

        info!(session_id = %session.id, %table, "created read session");

        Ok(ReadSession::new(self.client.clone(), session, scope))
    }

    /// Attaches to an existing read session. `scope` is used for split listings.
    pub async fn attach_read_session(
        &self,
        table: &TableIdentifier,
        session_id: &SessionId,
        scope: ScanScope,
    ) -> TunnelResult<ReadSession<C>> {
        let session = self
            .client
            .get_session(table, session_id, SessionKind::BatchRead)
            .await?;

        info!(session_id = %session.id, %table, status = %session.status, "attached read session");

        Ok(ReadSession::new(self.client.clone(), session, scope))
    }
}

impl<C> SessionCoordinator<C>
where
    C: WriteSessionClient + Clone,
{
    pub async fn create_write_session(
        &self,
        table: &TableIdentifier,
        options: &WriteSessionOptions,
    ) -> TunnelResult<WriteSession<C>> {
        let session = self.client.create_write_session(table, options).await?;

        info!(
            session_id = %session.id,
            %table,
            overwrite = options.overwrite,
            "created write session"
        );

        Ok(WriteSession::new(
            self.client.clone(),
            session,
            self.writer.clone(),
        ))
    }

    pub async fn attach_write_session(
        &self,
        table: &TableIdentifier,
        session_id: &SessionId,
    ) -> TunnelResult<WriteSession<C>> {
        let session = self
            .client
            .get_session(table, session_id, SessionKind::BatchWrite)
            .await?;

        info!(session_id = %session.id, %table, status = %session.status, "attached write session");

        Ok(WriteSession::new(
            self.client.clone(),
            session,
            self.writer.clone(),
        ))
    }
}

impl<C> SessionCoordinator<C>
where
    C: InstanceClient + Clone,
{
    /// Creates an interactive session.
    ///
    /// Returns as soon as the hosting instance exists, unless the options carry a start timeout,
    /// in which case the session is first waited for.
    pub async fn create_interactive(
        &self,
        options: InteractiveSessionOptions,
    ) -> TunnelResult<InteractiveSession<C>> {
        options.validate()?;

        let task_name = options
            .task_name
            .clone()
            .unwrap_or_else(|| self.poll.task_name.clone());
        let request = InstanceRequest {
            project: options
                .project
                .clone()
                .unwrap_or_else(|| self.project.clone()),
            task_name: task_name.clone(),
            settings: options.task_settings(),
            priority: options.priority,
            running_cluster: options.running_cluster.clone(),
        };

        let instance = self.client.create_instance(&request).await?;
        let log_view = self.client.log_view(&instance).await?;

        info!(
            instance_id = %instance,
            project = %request.project,
            task = %task_name,
            log_view = log_view.as_deref().unwrap_or_default(),
            "created interactive session"
        );

        let mut session = InteractiveSession::new(
            TaskChannel::new(self.client.clone(), instance, task_name),
            options.display_name(),
            Duration::from_millis(self.poll.interval_ms),
            self.shutdown_tx.subscribe(),
            log_view,
        );

        if let Some(timeout) = options.start_timeout {
            if !session.wait_for_start(timeout).await? {
                warn!(
                    instance_id = %session.instance_id(),
                    ?timeout,
                    "interactive session has not started yet"
                );
            }
        }

        Ok(session)
    }

    /// Attaches to the running interactive session `session_name`.
    ///
    /// `settings` are sent with the attaching task; the caller map is not modified. Without a
    /// `task_name` the configured default task name is used.
    pub async fn attach_interactive(
        &self,
        session_name: &str,
        settings: &BTreeMap<String, String>,
        start_timeout: Option<Duration>,
        task_name: Option<&str>,
    ) -> TunnelResult<InteractiveSession<C>> {
        let options = InteractiveSessionOptions::attach(
            session_name,
            settings.clone(),
            start_timeout,
            task_name.map(str::to_string),
        )?;

        self.create_interactive(options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::interactive::{SESSION_NAME_HINT, SHARE_ID_HINT, STATUS_CHANNEL, SUBMIT_MODE_HINT};
    use crate::test_utils::memory::{MemoryTableService, numbered_splits, settings, status_payload};
    use crate::types::SessionStatus;

    fn coordinator(service: &MemoryTableService) -> SessionCoordinator<MemoryTableService> {
        SessionCoordinator::new(service.clone(), "analytics")
    }

    #[tokio::test]
    async fn read_session_lists_its_scope() {
        let service = MemoryTableService::new();
        let coordinator = coordinator(&service);
        let table = coordinator.table("events");
        service.add_splits(&table, numbered_splits(3)).await;

        let mut session = coordinator
            .create_read_session(&table, ScanScope::full().with_page_size(10))
            .await
            .unwrap();

        let mut listing = session.list_splits();
        assert_eq!(listing.next_page().await.unwrap(), Some(numbered_splits(3)));

        session.stop().await.unwrap();
        session.stop().await.unwrap();

        let refreshed = session.refresh().await.unwrap();
        assert_eq!(refreshed.status, SessionStatus::Terminated);
    }

    #[tokio::test]
    async fn attach_fetches_a_fresh_snapshot() {
        let service = MemoryTableService::new();
        let coordinator = coordinator(&service);
        let table = coordinator.table("events");

        let created = coordinator
            .create_write_session(&table, &WriteSessionOptions::default())
            .await
            .unwrap();
        let attached = coordinator
            .attach_write_session(&table, &created.session().id)
            .await
            .unwrap();
        assert_eq!(attached.session(), created.session());

        let err = coordinator
            .attach_read_session(&table, &created.session().id, ScanScope::full())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceRequestFailed);
    }

    #[tokio::test]
    async fn interactive_session_uses_configured_defaults() {
        let service = MemoryTableService::new();
        let coordinator = coordinator(&service);
        service
            .script_channel(STATUS_CHANNEL, [status_payload(2, "")])
            .await;

        let caller_settings = settings([(SUBMIT_MODE_HINT, "interactive")]);
        let session = coordinator
            .create_interactive(
                InteractiveSessionOptions::new()
                    .with_session_name("s1")
                    .with_settings(caller_settings.clone())
                    .with_start_timeout(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        assert_eq!(session.phase(), crate::interactive::SessionPhase::Running);
        assert_eq!(session.task_name(), "console_sqlrt_task");
        assert_eq!(session.log_view(), Some("memory://logview/instance-1"));

        let instances = service.instances().await;
        let (_, request) = &instances[0];
        assert_eq!(request.project, "analytics");
        assert_eq!(request.settings.get(SESSION_NAME_HINT).map(String::as_str), Some("s1"));
        assert_eq!(request.settings.get(SUBMIT_MODE_HINT).map(String::as_str), Some("script"));
        assert_eq!(
            caller_settings.get(SUBMIT_MODE_HINT).map(String::as_str),
            Some("interactive")
        );
    }

    #[tokio::test]
    async fn attach_interactive_validates_the_name() {
        let service = MemoryTableService::new();
        let coordinator = coordinator(&service);

        let err = coordinator
            .attach_interactive("", &BTreeMap::new(), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(service.instances().await.is_empty());

        let session = coordinator
            .attach_interactive("shared", &BTreeMap::new(), None, None)
            .await
            .unwrap();
        assert_eq!(session.name(), Some("shared"));
        assert_eq!(session.task_name(), "console_sqlrt_task");

        let instances = service.instances().await;
        assert_eq!(
            instances[0].1.settings.get(SHARE_ID_HINT).map(String::as_str),
            Some("shared")
        );
        assert_eq!(instances[0].1.task_name, "console_sqlrt_task");
    }

    #[tokio::test]
    async fn attach_interactive_uses_the_given_task_name() {
        let service = MemoryTableService::new();
        let coordinator = coordinator(&service);

        let session = coordinator
            .attach_interactive("shared", &BTreeMap::new(), None, Some("reporting_task"))
            .await
            .unwrap();
        assert_eq!(session.task_name(), "reporting_task");

        let instances = service.instances().await;
        assert_eq!(instances[0].1.task_name, "reporting_task");

        let err = coordinator
            .attach_interactive("shared", &BTreeMap::new(), None, Some(" "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn blank_project_is_rejected() {
        let service = MemoryTableService::new();
        let coordinator = coordinator(&service);

        let err = coordinator
            .create_interactive(InteractiveSessionOptions::new().with_project(" "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
