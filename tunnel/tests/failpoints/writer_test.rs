use bytes::Bytes;
use tunnel::error::ErrorKind;
use tunnel::failpoints::{
    BLOCK_WRITER_BEFORE_FINISH, BLOCK_WRITER_BEFORE_OPEN, COMMIT_COORDINATOR_BEFORE_FINALIZE,
};
use tunnel::session::{SessionCoordinator, WriteSession};
use tunnel::test_utils::failpoints::ConfiguredFailScenario;
use tunnel::test_utils::memory::MemoryTableService;
use tunnel::types::{SessionStatus, WriteSessionOptions, WriterAttemptId};
use tunnel::write::{EncodedBatch, WriterPhase};
use tunnel_telemetry::tracing::init_test_tracing;

async fn write_session(service: &MemoryTableService) -> WriteSession<MemoryTableService> {
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");

    coordinator
        .create_write_session(&table, &WriteSessionOptions::default())
        .await
        .unwrap()
}

fn batch() -> EncodedBatch {
    EncodedBatch::new(Bytes::from_static(b"rows"), 2)
}

#[tokio::test(flavor = "multi_thread")]
async fn fault_before_finish_aborts_the_attempt() {
    init_test_tracing();
    let _scenario = ConfiguredFailScenario::setup(&[(BLOCK_WRITER_BEFORE_FINISH, "return")]);

    let service = MemoryTableService::new();
    let session = write_session(&service).await;
    let session_id = session.session().id.clone();

    let attempt = WriterAttemptId::default();
    let mut writer = session.create_writer(0, attempt);
    writer.write(&batch()).await.unwrap();

    let err = writer.commit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InjectedFault);
    assert_eq!(writer.phase(), WriterPhase::Aborted);

    let err = writer.commit().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriterClosed);

    assert_eq!(service.aborted_blocks().await, vec![(0, attempt)]);
    assert!(service.received_block(&session_id, 0, attempt).await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn fault_before_open_keeps_the_writer_idle() {
    init_test_tracing();
    let _scenario = ConfiguredFailScenario::setup(&[(BLOCK_WRITER_BEFORE_OPEN, "return")]);

    let service = MemoryTableService::new();
    let session = write_session(&service).await;

    let mut writer = session.create_writer(3, WriterAttemptId::new(2));
    let err = writer.write(&batch()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InjectedFault);
    assert_eq!(writer.phase(), WriterPhase::Idle);
    assert!(service.open_requests().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn fault_before_finalize_leaves_the_session_open() {
    init_test_tracing();
    let _scenario =
        ConfiguredFailScenario::setup(&[(COMMIT_COORDINATOR_BEFORE_FINALIZE, "return")]);

    let service = MemoryTableService::new();
    let mut session = write_session(&service).await;

    let mut writer = session.create_writer(0, WriterAttemptId::default());
    writer.write(&batch()).await.unwrap();
    let message = writer.commit().await.unwrap().unwrap();

    let mut commit = session.commit_coordinator();
    commit.add(message).unwrap();

    let err = session.commit(&commit).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InjectedFault);
    assert!(service.commits().await.is_empty());

    let refreshed = session.refresh().await.unwrap();
    assert_eq!(refreshed.status, SessionStatus::Active);
}
