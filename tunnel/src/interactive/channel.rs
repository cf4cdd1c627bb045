use metrics::counter;
use tracing::{trace, warn};

use crate::bail;
use crate::client::InstanceClient;
use crate::error::{ErrorKind, TunnelResult};
use crate::metrics::{CHANNEL_LABEL, INSTANCE_ID_LABEL, TUNNEL_CHANNEL_READS_TOTAL};
use crate::tunnel_error;
use crate::types::{InstanceId, SubQueryResponse};

/// Channel reporting the start-up state of a session.
pub const STATUS_CHANNEL: &str = "status";
/// Channel carrying the results of the running query.
pub const RESULT_CHANNEL: &str = "result";
/// Channel queries are submitted on.
pub const QUERY_CHANNEL: &str = "query";
/// Channel reporting execution statistics of the last query.
pub const SQL_STATS_CHANNEL: &str = "sqlstats";

/// Info channels of the task hosting an interactive session.
#[derive(Debug, Clone)]
pub(crate) struct TaskChannel<C> {
    client: C,
    instance: InstanceId,
    task_name: String,
}

impl<C> TaskChannel<C>
where
    C: InstanceClient,
{
    pub(crate) fn new(client: C, instance: InstanceId, task_name: String) -> Self {
        Self {
            client,
            instance,
            task_name,
        }
    }

    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    pub(crate) fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub(crate) fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Reads one payload from `key`, or `None` if the channel has nothing to report.
    pub(crate) async fn read_channel(&self, key: &str) -> TunnelResult<Option<SubQueryResponse>> {
        counter!(
            TUNNEL_CHANNEL_READS_TOTAL,
            INSTANCE_ID_LABEL => self.instance.to_string(),
            CHANNEL_LABEL => key.to_string()
        )
        .increment(1);

        let Some(payload) = self
            .client
            .task_info(&self.instance, &self.task_name, key)
            .await?
        else {
            trace!(instance_id = %self.instance, channel = key, "channel is empty");
            return Ok(None);
        };

        if payload.is_empty() {
            return Ok(None);
        }

        let response = serde_json::from_str(&payload).map_err(|err| {
            tunnel_error!(
                ErrorKind::DeserializationError,
                "Parsing a task info payload failed",
                format!("channel {key}, payload {payload}"),
                source: err
            )
        })?;

        Ok(Some(response))
    }

    pub(crate) async fn send(&self, key: &str, value: &str) -> TunnelResult<String> {
        self.client
            .set_task_info(&self.instance, &self.task_name, key, value)
            .await
    }

    /// Fails with [`ErrorKind::SessionFailed`] if the task has stopped running for good.
    ///
    /// A task the service does not report yet, or one that is still waiting, is considered
    /// alive.
    pub(crate) async fn ensure_task_alive(&self) -> TunnelResult<()> {
        let Some(status) = self
            .client
            .task_status(&self.instance, &self.task_name)
            .await?
        else {
            return Ok(());
        };

        if !status.is_terminal() {
            return Ok(());
        }

        let result = self
            .client
            .task_result(&self.instance, &self.task_name)
            .await?
            .unwrap_or_default();

        warn!(
            instance_id = %self.instance,
            task = %self.task_name,
            %status,
            "interactive session task is no longer running"
        );

        bail!(
            ErrorKind::SessionFailed,
            "The interactive session is no longer running",
            format!("Session[{}] is {status}: {result}", self.instance)
        );
    }
}
