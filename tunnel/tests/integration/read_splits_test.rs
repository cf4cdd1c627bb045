use futures::TryStreamExt;
use tunnel::error::{ErrorCategory, ErrorKind};
use tunnel::session::SessionCoordinator;
use tunnel::test_utils::memory::{MemoryTableService, numbered_splits};
use tunnel::types::{PaginationMarker, ScanScope, Split};
use tunnel_telemetry::tracing::init_test_tracing;

#[tokio::test]
async fn paginated_listing_matches_range_listing() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");
    service.add_splits(&table, numbered_splits(11)).await;

    let session = coordinator
        .create_read_session(&table, ScanScope::full().with_page_size(4))
        .await
        .unwrap();

    let mut listing = session.list_splits();
    let mut pages = vec![];
    while let Some(page) = listing.next_page().await.unwrap() {
        pages.push(page);
    }

    assert_eq!(
        pages.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![4, 4, 3]
    );

    let paginated: Vec<Split> = pages.into_iter().flatten().collect();
    let ranged = session.list_splits_in_range("0000", None).await.unwrap();
    assert_eq!(paginated, ranged);

    // Order is preserved and nothing is repeated.
    assert!(paginated.windows(2).all(|pair| pair[0].key < pair[1].key));

    // The first request carries no marker, every later one the marker of the page before it.
    assert_eq!(
        service.list_requests().await,
        vec![
            None,
            Some(PaginationMarker::new("4")),
            Some(PaginationMarker::new("8"))
        ]
    );
}

#[tokio::test]
async fn exhausted_listing_is_never_pulled_silently() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");
    service.add_splits(&table, numbered_splits(2)).await;

    let session = coordinator
        .create_read_session(&table, ScanScope::full())
        .await
        .unwrap();

    let mut listing = session.list_splits();
    assert!(listing.next_page().await.unwrap().is_some());
    assert!(listing.next_page().await.unwrap().is_none());

    let err = listing.next_page().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ListingExhausted);
    assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
    assert_eq!(service.list_requests().await.len(), 1);

    let err = session
        .split_assigner()
        .fetch_page(session.scope(), Some(&PaginationMarker::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StalePaginationMarker);
    assert_eq!(service.list_requests().await.len(), 1);
}

#[tokio::test]
async fn range_listing_bounds() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");
    service.add_splits(&table, numbered_splits(6)).await;

    let session = coordinator
        .create_read_session(&table, ScanScope::full())
        .await
        .unwrap();

    let splits = session
        .list_splits_in_range("0002", Some("0005"))
        .await
        .unwrap();
    let keys: Vec<_> = splits.iter().map(|split| split.key.as_str()).collect();
    assert_eq!(keys, vec!["0002", "0003", "0004"]);

    let tail = session.list_splits_in_range("0004", None).await.unwrap();
    assert_eq!(tail.len(), 2);

    assert_eq!(
        service.range_requests().await,
        vec![
            ("0002".to_string(), Some("0005".to_string())),
            ("0004".to_string(), None)
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn workers_consume_each_split_once() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");
    service.add_splits(&table, numbered_splits(40)).await;

    let session = coordinator
        .create_read_session(&table, ScanScope::full().with_page_size(7))
        .await
        .unwrap();
    let dispenser = session.dispenser();

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let dispenser = dispenser.clone();
            tokio::spawn(async move {
                let mut consumed = vec![];
                while let Some(split) = dispenser.next_split().await.unwrap() {
                    consumed.push(split);
                }
                consumed
            })
        })
        .collect();

    let mut consumed = vec![];
    for worker in workers {
        consumed.extend(worker.await.unwrap());
    }
    consumed.sort_by(|left, right| left.key.cmp(&right.key));

    assert_eq!(consumed, numbered_splits(40));
}

#[tokio::test]
async fn listing_as_stream() {
    init_test_tracing();
    let service = MemoryTableService::new();
    let coordinator = SessionCoordinator::new(service.clone(), "analytics");
    let table = coordinator.table("events");
    service.add_splits(&table, numbered_splits(5)).await;

    let session = coordinator
        .create_read_session(&table, ScanScope::full())
        .await
        .unwrap();

    let splits: Vec<_> = session.list_splits().into_stream().try_collect().await.unwrap();
    assert_eq!(splits, numbered_splits(5));
}
