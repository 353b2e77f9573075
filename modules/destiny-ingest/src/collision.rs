//! Step 4 of the per-entry algorithm: what to do with the incoming
//! enhancements once `upsert_identifiers` has told us the identifiers
//! already belong to `existing_id`.

use destiny_common::{CollisionStrategy, Enhancement, Result};
use destiny_store::RelationalStore;
use uuid::Uuid;

use crate::entry::EnhancementInput;

/// Enhancements to append to `existing_id` under the chosen strategy.
/// `Fail`/`Discard` never reach here — the caller short-circuits before
/// calling this.
pub async fn resolve_enhancements(
    store: &RelationalStore,
    existing_id: Uuid,
    strategy: CollisionStrategy,
    incoming: &[EnhancementInput],
) -> Result<Vec<Enhancement>> {
    let to_append = match strategy {
        CollisionStrategy::Fail | CollisionStrategy::Discard => Vec::new(),
        CollisionStrategy::Overwrite => {
            // Only keys that already exist on the reference get replaced;
            // keys the existing reference never had are left alone.
            let existing = store.list_enhancements(existing_id).await?;
            let existing_keys: std::collections::HashSet<(String, &'static str)> = existing
                .iter()
                .map(|e| (e.source.clone(), e.enhancement_type()))
                .collect();
            incoming
                .iter()
                .filter(|e| existing_keys.contains(&(e.source.clone(), e.content.enhancement_type())))
                .cloned()
                .collect()
        }
        CollisionStrategy::MergeDefensive => {
            let existing = store.list_enhancements(existing_id).await?;
            let existing_keys: std::collections::HashSet<(String, &'static str)> = existing
                .iter()
                .map(|e| (e.source.clone(), e.enhancement_type()))
                .collect();
            incoming
                .iter()
                .filter(|e| !existing_keys.contains(&(e.source.clone(), e.content.enhancement_type())))
                .cloned()
                .collect()
        }
        CollisionStrategy::MergeAggressive => incoming.to_vec(),
    };

    Ok(to_append
        .into_iter()
        .map(|e| Enhancement {
            id: Uuid::new_v4(),
            reference_id: existing_id,
            source: e.source,
            robot_version: e.robot_version,
            content: e.content,
            created_at: chrono::Utc::now(),
        })
        .collect())
}
