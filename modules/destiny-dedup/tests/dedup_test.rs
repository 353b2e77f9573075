use chrono::Utc;
use destiny_common::{Determination, DedupConfig, ExternalIdentifier, IdentifierType, Visibility};
use destiny_dedup::{DedupDeps, DedupEngine, Outcome};
use destiny_engine::MemoryEventSink;
use destiny_store::{NewDecision, RelationalStore, SearchIndex};
use destiny_taskbus::TaskBus;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

fn ident(reference_id: Uuid, identifier_type: IdentifierType, identifier: &str) -> ExternalIdentifier {
    ExternalIdentifier {
        reference_id,
        identifier_type,
        identifier: identifier.to_string(),
        other_identifier_name: None,
        created_at: Utc::now(),
    }
}

async fn deps(store: RelationalStore, pool: sqlx::PgPool, search_url: &str) -> DedupDeps {
    let taskbus = TaskBus::new(pool);
    taskbus.migrate().await.unwrap();
    let search = SearchIndex::new(search_url).await.unwrap();
    DedupDeps { store, search, taskbus, config: DedupConfig::default() }
}

/// Phase 1 finds a trusted-identifier match against an already-canonical
/// reference and promotes straight to `DUPLICATE` without ever touching the
/// search index. The match only exists here because we seed the rows
/// directly rather than through `upsert_identifiers`'s uniqueness check —
/// the same shape a manual identifier correction would produce.
#[tokio::test]
async fn identifier_shortcut_duplicate_skips_candidate_recall() {
    let Some(db_url) = std::env::var("DATABASE_TEST_URL").ok() else { return };
    let Some(search_url) = std::env::var("SEARCH_TEST_URL").ok() else { return };
    let pool = PgPoolOptions::new().max_connections(5).connect(&db_url).await.unwrap();
    let store = RelationalStore::new(pool.clone());
    store.migrate().await.unwrap();

    let canonical_id = Uuid::new_v4();
    store.create_reference(canonical_id, Visibility::Public).await.unwrap();
    store.upsert_identifiers(canonical_id, &[ident(canonical_id, IdentifierType::Doi, "10.5555/canon-1")]).await.unwrap();
    store
        .promote_decision(
            NewDecision { reference_id: canonical_id, canonical_reference_id: None, determination: Determination::Canonical },
            None,
        )
        .await
        .unwrap();

    let incoming_id = Uuid::new_v4();
    store.create_reference(incoming_id, Visibility::Public).await.unwrap();
    // Seeded directly: in normal operation `upsert_identifiers` would reject
    // this as a collision before a dedup run is ever enqueued.
    sqlx::query(
        "INSERT INTO external_identifiers (id, reference_id, identifier_type, identifier, other_identifier_name) \
         VALUES ($1, $2, 'doi', '10.5555/canon-1', NULL)",
    )
    .bind(Uuid::new_v4())
    .bind(incoming_id)
    .execute(&pool)
    .await
    .unwrap();

    let deps = deps(store, pool.clone(), &search_url).await;
    let engine = DedupEngine::new(MemoryEventSink::new(), deps, "test-run".to_string());
    let state = engine.decide(incoming_id).await.unwrap();

    match state.outcome {
        Some(Outcome::Promoted { canonical_reference_id, determination }) => {
            assert_eq!(canonical_reference_id, Some(canonical_id));
            assert_eq!(determination, Determination::Duplicate);
        }
        other => panic!("expected a promoted duplicate, got {other:?}"),
    }
}

/// Two existing canonical references are each matched by a different
/// trusted identifier on the incoming reference. Phase 1 cannot pick one
/// canonical over the other, so it raises `UNRESOLVED` rather than guess —
/// spec example "shortcut ambiguous".
#[tokio::test]
async fn identifier_shortcut_ambiguous_across_two_canonicals_is_unresolved() {
    let Some(db_url) = std::env::var("DATABASE_TEST_URL").ok() else { return };
    let Some(search_url) = std::env::var("SEARCH_TEST_URL").ok() else { return };
    let pool = PgPoolOptions::new().max_connections(5).connect(&db_url).await.unwrap();
    let store = RelationalStore::new(pool.clone());
    store.migrate().await.unwrap();

    let ref_a = Uuid::new_v4();
    store.create_reference(ref_a, Visibility::Public).await.unwrap();
    store.upsert_identifiers(ref_a, &[ident(ref_a, IdentifierType::OpenAlex, "W1")]).await.unwrap();
    store
        .promote_decision(NewDecision { reference_id: ref_a, canonical_reference_id: None, determination: Determination::Canonical }, None)
        .await
        .unwrap();

    let ref_b = Uuid::new_v4();
    store.create_reference(ref_b, Visibility::Public).await.unwrap();
    store.upsert_identifiers(ref_b, &[ident(ref_b, IdentifierType::Doi, "10.9/z")]).await.unwrap();
    store
        .promote_decision(NewDecision { reference_id: ref_b, canonical_reference_id: None, determination: Determination::Canonical }, None)
        .await
        .unwrap();

    let incoming_id = Uuid::new_v4();
    store.create_reference(incoming_id, Visibility::Public).await.unwrap();
    for (identifier_type, value) in [("open_alex", "W1"), ("doi", "10.9/z")] {
        sqlx::query(
            "INSERT INTO external_identifiers (id, reference_id, identifier_type, identifier, other_identifier_name) \
             VALUES ($1, $2, $3, $4, NULL)",
        )
        .bind(Uuid::new_v4())
        .bind(incoming_id)
        .bind(identifier_type)
        .bind(value)
        .execute(&pool)
        .await
        .unwrap();
    }

    let deps = deps(store, pool.clone(), &search_url).await;
    let engine = DedupEngine::new(MemoryEventSink::new(), deps, "test-run".to_string());
    let state = engine.decide(incoming_id).await.unwrap();

    match state.outcome {
        Some(Outcome::Promoted { canonical_reference_id, determination }) => {
            assert_eq!(canonical_reference_id, None);
            assert_eq!(determination, Determination::Unresolved);
        }
        other => panic!("expected an unresolved promotion, got {other:?}"),
    }
}

/// No trusted identifiers and no candidates recalled (empty title) settles
/// straight on `CANONICAL` — the default outcome for a reference nothing
/// else in the store resembles.
#[tokio::test]
async fn no_identifiers_and_no_title_promotes_canonical() {
    let Some(db_url) = std::env::var("DATABASE_TEST_URL").ok() else { return };
    let Some(search_url) = std::env::var("SEARCH_TEST_URL").ok() else { return };
    let pool = PgPoolOptions::new().max_connections(5).connect(&db_url).await.unwrap();
    let store = RelationalStore::new(pool.clone());
    store.migrate().await.unwrap();

    let incoming_id = Uuid::new_v4();
    store.create_reference(incoming_id, Visibility::Public).await.unwrap();
    store.upsert_identifiers(incoming_id, &[ident(incoming_id, IdentifierType::Other, "unlisted-archive-42")]).await.unwrap();

    let deps = deps(store, pool.clone(), &search_url).await;
    let engine = DedupEngine::new(MemoryEventSink::new(), deps, "test-run".to_string());
    let state = engine.decide(incoming_id).await.unwrap();

    match state.outcome {
        Some(Outcome::Promoted { canonical_reference_id, determination }) => {
            assert_eq!(canonical_reference_id, None);
            assert_eq!(determination, Determination::Canonical);
        }
        other => panic!("expected a canonical promotion, got {other:?}"),
    }
}
