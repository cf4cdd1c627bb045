use bytes::Bytes;
use serde::Serialize;
use tunnel::error::{ErrorCategory, ErrorKind};
use tunnel::session::SessionCoordinator;
use tunnel::test_utils::memory::MemoryTableService;
use tunnel::types::{DataFormatType, SessionStatus, WriteSessionOptions, WriterAttemptId};
use tunnel::write::{EncodedBatch, JsonLinesCodec, WriterPhase};
use tunnel_config::shared::{CommitConflictPolicy, WriterConfig};
use tunnel_telemetry::tracing::init_test_tracing;

#[derive(Serialize)]
struct Event {
    id: u64,
    kind: &'static str,
}

#[tokio::test]
async fn retried_block_commits_once() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");

    let mut session = coordinator
        .create_write_session(&table, &WriteSessionOptions::default())
        .await
        .unwrap();
    let session_id = session.session().id.clone();

    let first_attempt = WriterAttemptId::new(1);
    service.fail_finish(0, first_attempt).await;

    let mut writer = session.create_writer(0, first_attempt);
    writer
        .write(&EncodedBatch::new(Bytes::from_static(b"rows"), 2))
        .await
        .unwrap();
    let err = writer.commit().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TransportFault);
    assert_eq!(writer.phase(), WriterPhase::Aborted);

    let second_attempt = first_attempt.next();
    let mut writer = session.create_writer(0, second_attempt);
    writer
        .write(&EncodedBatch::new(Bytes::from_static(b"rows"), 2))
        .await
        .unwrap();
    let message = writer.commit().await.unwrap().unwrap();

    let mut commit = session.commit_coordinator();
    commit.add(message.clone()).unwrap();
    // Workers may ship the same message twice.
    commit.add(message).unwrap();

    let committed = session.commit(&commit).await.unwrap();
    assert_eq!(committed.status, SessionStatus::Committed);

    let commits = service.commits().await;
    assert_eq!(commits.len(), 1);
    let (committed_session, messages) = &commits[0];
    assert_eq!(committed_session, &session_id);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].attempt(), second_attempt);
    assert!(
        service
            .received_block(&session_id, 0, first_attempt)
            .await
            .is_none()
    );
}

#[tokio::test]
async fn blocks_are_committed_in_block_order() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");

    let mut session = coordinator
        .create_write_session(&table, &WriteSessionOptions::default())
        .await
        .unwrap();

    let mut handles = vec![];
    for block_number in [3u64, 1, 2, 0] {
        let mut writer = session.create_writer_with_codec(
            block_number,
            WriterAttemptId::default(),
            JsonLinesCodec::<Event>::new(),
        );
        handles.push(tokio::spawn(async move {
            writer
                .write(&[
                    Event { id: block_number * 10, kind: "open" },
                    Event { id: block_number * 10 + 1, kind: "close" },
                ])
                .await
                .unwrap();
            let metrics = writer.metrics();
            let message = writer.commit().await.unwrap();
            (message, metrics.records_written())
        }));
    }

    let mut commit = session.commit_coordinator();
    for handle in handles {
        let (message, records) = handle.await.unwrap();
        assert_eq!(records, 2);
        commit.add(message.unwrap()).unwrap();
    }

    session.commit(&commit).await.unwrap();

    let commits = service.commits().await;
    let blocks: Vec<_> = commits[0]
        .1
        .iter()
        .map(|message| message.block_number())
        .collect();
    assert_eq!(blocks, vec![0, 1, 2, 3]);

    let open_requests = service.open_requests().await;
    assert!(
        open_requests
            .iter()
            .all(|request| request.data_format.kind == DataFormatType::Arrow)
    );
}

#[tokio::test]
async fn conflicting_attempts_follow_the_configured_policy() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let table_name = "events";

    for policy in [CommitConflictPolicy::Reject, CommitConflictPolicy::LatestAttemptWins] {
        let coordinator = SessionCoordinator::new(service.clone(), "analytics").with_writer_config(
            WriterConfig {
                commit_conflict_policy: policy,
                ..WriterConfig::default()
            },
        );
        let table = coordinator.table(table_name);
        let mut session = coordinator
            .create_write_session(&table, &WriteSessionOptions::default())
            .await
            .unwrap();

        let mut commit = session.commit_coordinator();
        for attempt in [WriterAttemptId::new(0), WriterAttemptId::new(1)] {
            let mut writer = session.create_writer(5, attempt);
            writer
                .write(&EncodedBatch::new(Bytes::from_static(b"x"), 1))
                .await
                .unwrap();
            commit.add(writer.commit().await.unwrap().unwrap()).unwrap();
        }

        match policy {
            CommitConflictPolicy::Reject => {
                let err = session.commit(&commit).await.unwrap_err();
                assert_eq!(err.kind(), ErrorKind::ConflictingCommitMessages);

                commit.choose_attempt(5, WriterAttemptId::new(0));
                session.commit(&commit).await.unwrap();
            }
            CommitConflictPolicy::LatestAttemptWins => {
                session.commit(&commit).await.unwrap();
            }
        }
    }

    let commits = service.commits().await;
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].1[0].attempt(), WriterAttemptId::new(0));
    assert_eq!(commits[1].1[0].attempt(), WriterAttemptId::new(1));
}

#[tokio::test]
async fn writers_of_a_stopped_session_cannot_open() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");

    let mut session = coordinator
        .create_write_session(&table, &WriteSessionOptions::default())
        .await
        .unwrap();
    session.stop().await.unwrap();

    let mut writer = session.create_writer(0, WriterAttemptId::default());
    let err = writer
        .write(&EncodedBatch::new(Bytes::from_static(b"x"), 1))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::TransportFault);
    assert_eq!(writer.phase(), WriterPhase::Idle);
}

#[tokio::test]
async fn refresh_reports_a_session_failed_by_the_service() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");

    let mut session = coordinator
        .create_write_session(&table, &WriteSessionOptions::default())
        .await
        .unwrap();
    let session_id = session.session().id.clone();
    assert_eq!(session.session().status, SessionStatus::Active);

    service
        .set_session_status(&session_id, SessionStatus::Failed)
        .await;

    let refreshed = session.refresh().await.unwrap();
    assert_eq!(refreshed.status, SessionStatus::Failed);

    let mut writer = session.create_writer(0, WriterAttemptId::default());
    let err = writer
        .write(&EncodedBatch::new(Bytes::from_static(b"x"), 1))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceRequestFailed);
    assert!(err.detail().unwrap().contains("is failed"));
    assert_eq!(writer.phase(), WriterPhase::Idle);
}
