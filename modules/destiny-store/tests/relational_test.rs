//! Integration tests against a real Postgres. Skipped unless `DATABASE_TEST_URL`
//! is set, matching the teacher's `destiny-events` store tests.

use chrono::Utc;
use destiny_common::{
    Determination, Enhancement, EnhancementContent, ExternalIdentifier, IdentifierType, Visibility,
};
use destiny_store::{NewDecision, RelationalStore};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

async fn test_store() -> Option<RelationalStore> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.ok()?;
    let store = RelationalStore::new(pool);
    store.migrate().await.expect("migrations should apply cleanly");
    Some(store)
}

fn doi_identifier(reference_id: Uuid, doi: &str) -> ExternalIdentifier {
    ExternalIdentifier {
        reference_id,
        identifier_type: IdentifierType::Doi,
        identifier: doi.to_string(),
        other_identifier_name: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn upsert_identifiers_rejects_collision_with_another_reference() {
    let Some(store) = test_store().await else { return };

    let r1 = Uuid::new_v4();
    let r2 = Uuid::new_v4();
    store.create_reference(r1, Visibility::Public).await.unwrap();
    store.create_reference(r2, Visibility::Public).await.unwrap();

    store
        .upsert_identifiers(r1, &[doi_identifier(r1, "10.1234/x")])
        .await
        .unwrap();

    let err = store
        .upsert_identifiers(r2, &[doi_identifier(r2, "10.1234/x")])
        .await
        .unwrap_err();

    match err {
        destiny_common::DestinyError::IdentifierCollision { conflicting } => {
            assert_eq!(conflicting, vec![r1]);
        }
        other => panic!("expected IdentifierCollision, got {other:?}"),
    }
}

#[tokio::test]
async fn upsert_identifiers_is_idempotent_for_the_same_reference() {
    let Some(store) = test_store().await else { return };

    let r1 = Uuid::new_v4();
    store.create_reference(r1, Visibility::Public).await.unwrap();

    store.upsert_identifiers(r1, &[doi_identifier(r1, "10.5/again")]).await.unwrap();
    store.upsert_identifiers(r1, &[doi_identifier(r1, "10.5/again")]).await.unwrap();

    let idents = store.list_identifiers(r1).await.unwrap();
    assert_eq!(idents.len(), 1);
}

#[tokio::test]
async fn promote_decision_rejects_stale_version() {
    let Some(store) = test_store().await else { return };

    let r1 = Uuid::new_v4();
    store.create_reference(r1, Visibility::Public).await.unwrap();

    let first = store
        .promote_decision(
            NewDecision {
                reference_id: r1,
                canonical_reference_id: None,
                determination: Determination::Canonical,
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(first.version, 1);

    // Promoting again with the stale `expected_version = None` must fail —
    // the active row is now at version 1.
    let err = store
        .promote_decision(
            NewDecision {
                reference_id: r1,
                canonical_reference_id: None,
                determination: Determination::Unresolved,
            },
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, destiny_common::DestinyError::DecisionStale { .. }));

    // The correct expected_version succeeds.
    let second = store
        .promote_decision(
            NewDecision {
                reference_id: r1,
                canonical_reference_id: None,
                determination: Determination::Unresolved,
            },
            Some(1),
        )
        .await
        .unwrap();
    assert_eq!(second.version, 2);
}

#[tokio::test]
async fn find_duplicates_of_returns_only_active_pointers() {
    let Some(store) = test_store().await else { return };

    let canonical = Uuid::new_v4();
    let dup = Uuid::new_v4();
    store.create_reference(canonical, Visibility::Public).await.unwrap();
    store.create_reference(dup, Visibility::Public).await.unwrap();

    store
        .promote_decision(
            NewDecision {
                reference_id: canonical,
                canonical_reference_id: None,
                determination: Determination::Canonical,
            },
            None,
        )
        .await
        .unwrap();

    store
        .promote_decision(
            NewDecision {
                reference_id: dup,
                canonical_reference_id: Some(canonical),
                determination: Determination::Duplicate,
            },
            None,
        )
        .await
        .unwrap();

    let members = store.find_duplicates_of(canonical).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, dup);
}

#[tokio::test]
async fn enhancements_are_append_only_and_latest_wins_by_insertion_order() {
    let Some(store) = test_store().await else { return };

    let r1 = Uuid::new_v4();
    store.create_reference(r1, Visibility::Public).await.unwrap();

    let first = Enhancement {
        id: Uuid::new_v4(),
        reference_id: r1,
        source: "manual".to_string(),
        robot_version: None,
        content: EnhancementContent::Abstract { text: "A".to_string() },
        created_at: Utc::now(),
    };
    let second = Enhancement {
        id: Uuid::new_v4(),
        reference_id: r1,
        source: "manual".to_string(),
        robot_version: None,
        content: EnhancementContent::Abstract { text: "B".to_string() },
        created_at: Utc::now(),
    };

    store.append_enhancements(&[first]).await.unwrap();
    store.append_enhancements(&[second]).await.unwrap();

    let all = store.list_enhancements(r1).await.unwrap();
    assert_eq!(all.len(), 2, "append-only: both rows remain in storage");
    match &all.last().unwrap().content {
        EnhancementContent::Abstract { text } => assert_eq!(text, "B"),
        _ => panic!("expected abstract"),
    }
}
