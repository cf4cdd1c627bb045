use std::collections::BTreeMap;
use std::time::Duration;

use futures::TryStreamExt;
use tunnel::error::ErrorKind;
use tunnel::interactive::{
    InteractiveSessionOptions, QUERY_CHANNEL, RESULT_CHANNEL, STATUS_CHANNEL, SessionPhase,
};
use tunnel::session::SessionCoordinator;
use tunnel::test_utils::memory::{
    MemoryTableService, progress_payload, settings, status_payload,
};
use tunnel::types::{ObjectStatus, TaskStatus};
use tunnel_config::shared::PollConfig;
use tunnel_telemetry::tracing::init_test_tracing;

fn coordinator(service: &MemoryTableService) -> SessionCoordinator<MemoryTableService> {
    SessionCoordinator::new(service.clone(), "analytics").with_poll_config(PollConfig {
        interval_ms: 500,
        ..PollConfig::default()
    })
}

#[tokio::test(start_paused = true)]
async fn start_polling_converges_on_running() {
    init_test_tracing();
    let service = MemoryTableService::new();
    service
        .script_channel(
            STATUS_CHANNEL,
            [
                None,
                None,
                progress_payload(1, 1, 10),
                status_payload(2, "session ready"),
            ],
        )
        .await;

    let mut session = coordinator(&service)
        .create_interactive(InteractiveSessionOptions::new().with_session_name("s1"))
        .await
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Starting);

    assert!(session.wait_for_start(Duration::from_secs(60)).await.unwrap());
    assert_eq!(session.phase(), SessionPhase::Running);
    assert_eq!(session.start_message(), "session ready");

    let progress = session.start_progress().await.unwrap().unwrap();
    assert_eq!(progress.launched_worker_count, 1);
    assert_eq!(progress.total_worker_count, 10);

    assert_eq!(service.read_count(STATUS_CHANNEL).await, 4);

    // Once running, the status channel is not read again.
    assert!(session.is_started().await.unwrap());
    assert_eq!(service.read_count(STATUS_CHANNEL).await, 4);
}

#[tokio::test(start_paused = true)]
async fn query_results_end_with_the_final_status() {
    init_test_tracing();
    let service = MemoryTableService::new();
    service
        .script_channel(STATUS_CHANNEL, [status_payload(2, "")])
        .await;
    service
        .script_channel(
            RESULT_CHANNEL,
            [
                None,
                None,
                status_payload(2, "partial"),
                status_payload(5, "done"),
            ],
        )
        .await;

    let mut session = coordinator(&service)
        .create_interactive(
            InteractiveSessionOptions::new()
                .with_session_name("s1")
                .with_start_timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();
    assert!(session.is_started().await.unwrap());

    let results: Vec<_> = session
        .run("SELECT 1", &settings([("odps.sql.allow.fullscan", "true")]))
        .await
        .unwrap()
        .into_stream()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, Some(ObjectStatus::Running));
    assert_eq!(results[0].result.as_deref(), Some("partial"));
    assert_eq!(results[1].status, Some(ObjectStatus::Terminated));
    assert_eq!(results[1].result.as_deref(), Some("done"));
    assert_eq!(service.read_count(RESULT_CHANNEL).await, 4);

    let writes = service.info_writes().await;
    assert_eq!(writes.len(), 1);
    let (key, payload) = &writes[0];
    assert_eq!(key, QUERY_CHANNEL);
    let payload: serde_json::Value = serde_json::from_str(payload).unwrap();
    assert_eq!(payload["query"], "SELECT 1");
    assert_eq!(payload["settings"]["odps.sql.allow.fullscan"], "true");

    session.stop().await.unwrap();
    session.stop().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Cancelled);
    assert!(service.is_stopped(session.instance_id()).await);
}

#[tokio::test(start_paused = true)]
async fn dead_task_fails_the_waiting_caller() {
    init_test_tracing();
    let service = MemoryTableService::new();
    service
        .script_task_status([None, Some(TaskStatus::Failed)])
        .await;
    service.set_task_result("worker quota exceeded").await;

    let mut session = coordinator(&service)
        .create_interactive(InteractiveSessionOptions::new())
        .await
        .unwrap();

    let err = session.wait_for_start(Duration::ZERO).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionFailed);
    assert!(err.to_string().contains("worker quota exceeded"));
    assert_eq!(session.phase(), SessionPhase::Failed);

    let mut results = session.run("SELECT 1", &BTreeMap::new()).await.unwrap();
    let err = results.next().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionFailed);
    assert!(!results.is_terminated());
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_polling() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = coordinator(&service);

    let mut session = coordinator
        .create_interactive(InteractiveSessionOptions::new())
        .await
        .unwrap();

    let shutdown_tx = coordinator.shutdown_tx();
    let waiter = tokio::spawn(async move { session.wait_for_start(Duration::ZERO).await });

    tokio::time::sleep(Duration::from_secs(2)).await;
    shutdown_tx.shutdown();

    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interrupted);
}
