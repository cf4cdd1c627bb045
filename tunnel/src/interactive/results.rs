use std::time::Duration;

use futures::Stream;
use tracing::debug;

use crate::bail;
use crate::client::InstanceClient;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, TunnelError, TunnelResult};
use crate::interactive::TaskChannel;
use crate::interactive::channel::RESULT_CHANNEL;
use crate::types::{ObjectStatus, SubQueryResponse};

/// Pull-based sequence of the results of one submitted query.
///
/// Every pull reads the result channel. While the channel is empty the owning task is checked
/// and the channel is read again after one poll interval. A payload whose status is not
/// running is the last one: it is returned and every later pull returns `None`.
#[derive(Debug)]
pub struct QueryResults<C> {
    channel: TaskChannel<C>,
    poll_interval: Duration,
    shutdown_rx: ShutdownRx,
    terminated: bool,
}

impl<C> QueryResults<C>
where
    C: InstanceClient,
{
    pub(crate) fn new(
        channel: TaskChannel<C>,
        poll_interval: Duration,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            channel,
            poll_interval,
            shutdown_rx,
            terminated: false,
        }
    }

    /// Returns `true` once the final result was returned.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Waits for the next result of the query.
    pub async fn next(&mut self) -> TunnelResult<Option<SubQueryResponse>> {
        if self.terminated {
            return Ok(None);
        }

        loop {
            if let Some(response) = self.channel.read_channel(RESULT_CHANNEL).await? {
                if let Some(status) = response.status {
                    if status != ObjectStatus::Running {
                        debug!(
                            instance_id = %self.channel.instance(),
                            %status,
                            "query finished"
                        );
                        self.terminated = true;
                    }

                    return Ok(Some(response));
                }
            }

            self.channel.ensure_task_alive().await?;

            if self.shutdown_rx.sleep(self.poll_interval).await.should_shutdown() {
                bail!(
                    ErrorKind::Interrupted,
                    "Interrupted while waiting for query results",
                    format!("instance {}", self.channel.instance())
                );
            }
        }
    }

    /// Converts the results into a stream that ends after the final result.
    pub fn into_stream(self) -> impl Stream<Item = TunnelResult<SubQueryResponse>> {
        futures::stream::try_unfold(self, |mut results| async move {
            let response = results.next().await?;
            Ok::<_, TunnelError>(response.map(|response| (response, results)))
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::test_utils::memory::{MemoryTableService, status_payload};
    use crate::types::{InstanceRequest, TaskStatus};

    async fn results(service: &MemoryTableService) -> QueryResults<MemoryTableService> {
        let instance = service
            .create_instance(&InstanceRequest {
                project: "analytics".to_string(),
                task_name: "console_sqlrt_task".to_string(),
                settings: Default::default(),
                priority: None,
                running_cluster: None,
            })
            .await
            .unwrap();
        let (_, rx) = create_shutdown_channel();

        QueryResults::new(
            TaskChannel::new(service.clone(), instance, "console_sqlrt_task".to_string()),
            Duration::from_secs(3),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_payload_ends_the_sequence() {
        let service = MemoryTableService::new();
        let results = results(&service).await;
        service
            .script_channel(
                RESULT_CHANNEL,
                [
                    None,
                    status_payload(2, "partial"),
                    None,
                    status_payload(5, "done"),
                    status_payload(2, "never read"),
                ],
            )
            .await;

        let responses: Vec<_> = results.into_stream().try_collect().await.unwrap();
        let texts: Vec<_> = responses
            .iter()
            .map(|response| response.non_empty_result().unwrap_or_default())
            .collect();

        assert_eq!(texts, vec!["partial", "done"]);
        assert_eq!(service.read_count(RESULT_CHANNEL).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn pulls_after_termination_are_empty() {
        let service = MemoryTableService::new();
        let mut results = results(&service).await;
        service
            .script_channel(RESULT_CHANNEL, [status_payload(4, "error")])
            .await;

        let last = results.next().await.unwrap().unwrap();
        assert_eq!(last.status, Some(ObjectStatus::Failed));
        assert!(results.is_terminated());

        assert!(results.next().await.unwrap().is_none());
        assert!(results.next().await.unwrap().is_none());
        assert_eq!(service.read_count(RESULT_CHANNEL).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_ends_only_the_pending_pull() {
        let service = MemoryTableService::new();
        let instance = service
            .create_instance(&InstanceRequest {
                project: "analytics".to_string(),
                task_name: "console_sqlrt_task".to_string(),
                settings: Default::default(),
                priority: None,
                running_cluster: None,
            })
            .await
            .unwrap();
        let (tx, rx) = create_shutdown_channel();
        let mut results = QueryResults::new(
            TaskChannel::new(service.clone(), instance, "console_sqlrt_task".to_string()),
            Duration::from_secs(3),
            rx,
        );

        tx.shutdown();
        let err = results.next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert!(!results.is_terminated());

        service
            .script_channel(RESULT_CHANNEL, [None, status_payload(5, "done")])
            .await;
        let last = results.next().await.unwrap().unwrap();
        assert_eq!(last.non_empty_result(), Some("done"));
        assert!(results.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_task_fails_the_pull() {
        let service = MemoryTableService::new();
        let mut results = results(&service).await;
        service
            .script_task_status([Some(TaskStatus::Running), Some(TaskStatus::Failed)])
            .await;

        let err = results.next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionFailed);
        assert_eq!(service.read_count(RESULT_CHANNEL).await, 2);
    }
}
