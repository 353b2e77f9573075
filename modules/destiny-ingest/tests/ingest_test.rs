use destiny_common::{CollisionStrategy, ImportResultStatus};
use destiny_ingest::IngestPipeline;
use destiny_store::RelationalStore;
use destiny_taskbus::TaskBus;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;

#[tokio::test]
async fn new_reference_is_persisted_and_enqueued_for_dedup() {
    let Some(url) = std::env::var("DATABASE_TEST_URL").ok() else { return };
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();

    let store = RelationalStore::new(pool.clone());
    store.migrate().await.unwrap();
    let bus = TaskBus::new(pool.clone());
    bus.migrate().await.unwrap();

    let lease_bus = TaskBus::new(pool.clone());
    let pipeline = IngestPipeline::new(store, bus, 8);

    let line = json!({
        "identifiers": [{"identifier_type": "doi", "identifier": "10.5555/new-ref-1"}],
        "enhancements": [{"source": "submitter", "content": {"enhancement_type": "abstract", "text": "a summary"}}]
    })
    .to_string();

    let results = pipeline
        .process_batch(vec![(1, serde_json::from_str(&line))], CollisionStrategy::Fail)
        .await;

    assert_eq!(results.len(), 1);
    let (line_no, result) = &results[0];
    assert_eq!(*line_no, 1);
    assert_eq!(result.status, ImportResultStatus::Completed);
    assert!(result.reference_id.is_some());

    let leased = lease_bus
        .lease("dedup", chrono::Duration::seconds(30), "test-worker")
        .await
        .unwrap();
    assert!(leased.is_some(), "a dedup task should have been enqueued for the new reference");
}

#[tokio::test]
async fn missing_identifier_fails_validation() {
    let Some(url) = std::env::var("DATABASE_TEST_URL").ok() else { return };
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();
    let store = RelationalStore::new(pool.clone());
    store.migrate().await.unwrap();
    let bus = TaskBus::new(pool);
    bus.migrate().await.unwrap();
    let pipeline = IngestPipeline::new(store, bus, 8);

    let line = json!({ "identifiers": [] }).to_string();
    let results = pipeline
        .process_batch(vec![(1, serde_json::from_str(&line))], CollisionStrategy::Fail)
        .await;

    assert_eq!(results[0].1.status, ImportResultStatus::Failed);
}

#[tokio::test]
async fn colliding_identifier_under_fail_strategy_fails_the_entry() {
    let Some(url) = std::env::var("DATABASE_TEST_URL").ok() else { return };
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();
    let store = RelationalStore::new(pool.clone());
    store.migrate().await.unwrap();
    let bus = TaskBus::new(pool.clone());
    bus.migrate().await.unwrap();
    let pipeline = IngestPipeline::new(store, bus, 8);

    let first_line = json!({
        "identifiers": [{"identifier_type": "doi", "identifier": "10.5555/collide-1"}]
    })
    .to_string();

    let first = pipeline
        .process_batch(vec![(1, serde_json::from_str(&first_line))], CollisionStrategy::Fail)
        .await;
    assert_eq!(first[0].1.status, ImportResultStatus::Completed);

    // Same identifier, but with a new enhancement the existing reference
    // doesn't have yet — not subsumed, so this is a real collision rather
    // than the exact-duplicate shortcut.
    let second_line = json!({
        "identifiers": [{"identifier_type": "doi", "identifier": "10.5555/collide-1"}],
        "enhancements": [{"source": "submitter", "content": {"enhancement_type": "abstract", "text": "new info"}}]
    })
    .to_string();
    let second = pipeline
        .process_batch(vec![(1, serde_json::from_str(&second_line))], CollisionStrategy::Fail)
        .await;
    assert_eq!(second[0].1.status, ImportResultStatus::Failed);
    assert_eq!(second[0].1.colliding_reference_ids, vec![first[0].1.reference_id.unwrap()]);
}

#[tokio::test]
async fn colliding_identifier_under_discard_strategy_returns_existing_reference() {
    let Some(url) = std::env::var("DATABASE_TEST_URL").ok() else { return };
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();
    let store = RelationalStore::new(pool.clone());
    store.migrate().await.unwrap();
    let bus = TaskBus::new(pool.clone());
    bus.migrate().await.unwrap();
    let pipeline = IngestPipeline::new(store, bus, 8);

    let first_line = json!({
        "identifiers": [{"identifier_type": "doi", "identifier": "10.5555/collide-discard-1"}]
    })
    .to_string();

    let first = pipeline
        .process_batch(vec![(1, serde_json::from_str(&first_line))], CollisionStrategy::Fail)
        .await;
    let existing_id = first[0].1.reference_id.unwrap();

    let second_line = json!({
        "identifiers": [{"identifier_type": "doi", "identifier": "10.5555/collide-discard-1"}],
        "enhancements": [{"source": "submitter", "content": {"enhancement_type": "abstract", "text": "new info"}}]
    })
    .to_string();
    let second = pipeline
        .process_batch(vec![(1, serde_json::from_str(&second_line))], CollisionStrategy::Discard)
        .await;
    assert_eq!(second[0].1.status, ImportResultStatus::Completed);
    assert_eq!(second[0].1.reference_id, Some(existing_id));
}

#[tokio::test]
async fn exact_duplicate_entry_is_shortcut_onto_the_canonical_reference() {
    let Some(url) = std::env::var("DATABASE_TEST_URL").ok() else { return };
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();
    let store = RelationalStore::new(pool.clone());
    store.migrate().await.unwrap();
    let bus = TaskBus::new(pool.clone());
    bus.migrate().await.unwrap();
    let pipeline = IngestPipeline::new(store, bus, 8);

    let line = json!({
        "identifiers": [{"identifier_type": "doi", "identifier": "10.5555/exact-dup-1"}]
    })
    .to_string();

    let first = pipeline
        .process_batch(vec![(1, serde_json::from_str(&line))], CollisionStrategy::Fail)
        .await;
    let canonical_id = first[0].1.reference_id.unwrap();

    // Re-importing the exact same (subset) payload should be recognized as
    // an exact duplicate before `upsert_identifiers` is ever attempted —
    // so it never surfaces as an `IdentifierCollision` — and should skip
    // import entirely rather than minting a second reference row.
    let second = pipeline
        .process_batch(vec![(1, serde_json::from_str(&line))], CollisionStrategy::Fail)
        .await;
    assert_eq!(second[0].1.status, ImportResultStatus::Completed);
    assert_eq!(second[0].1.colliding_reference_ids, vec![canonical_id]);
    assert_eq!(second[0].1.reference_id, Some(canonical_id));
}

#[tokio::test]
async fn partial_batch_failure_does_not_abort_other_entries() {
    let Some(url) = std::env::var("DATABASE_TEST_URL").ok() else { return };
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.unwrap();
    let store = RelationalStore::new(pool.clone());
    store.migrate().await.unwrap();
    let bus = TaskBus::new(pool.clone());
    bus.migrate().await.unwrap();
    let pipeline = IngestPipeline::new(store, bus, 8);

    let good = json!({
        "identifiers": [{"identifier_type": "doi", "identifier": "10.5555/partial-batch-good"}]
    })
    .to_string();

    let lines = vec![
        (1, serde_json::from_str(&good)),
        (2, serde_json::from_str::<destiny_ingest::ImportEntry>("not json")),
        (3, serde_json::from_str(&json!({ "identifiers": [] }).to_string())),
    ];

    let results = pipeline.process_batch(lines, CollisionStrategy::Fail).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].1.status, ImportResultStatus::Completed);
    assert_eq!(results[1].1.status, ImportResultStatus::Failed);
    assert_eq!(results[2].1.status, ImportResultStatus::Failed);
}
