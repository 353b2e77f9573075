//! Registering and removing automations. The percolator document id and the
//! `robot_automations` row id must be the same uuid — generated here, once,
//! and handed to both stores — so a percolate hit's `_id` resolves straight
//! back to a row without a side index.

use destiny_common::{Result, RobotAutomation};
use destiny_store::{validate_automation_query, RelationalStore, SearchIndex};
use uuid::Uuid;

pub async fn register(store: &RelationalStore, search: &SearchIndex, automation: &RobotAutomation) -> Result<Uuid> {
    validate_automation_query(&automation.query)?;
    let id = Uuid::new_v4();
    search.register_percolator_query(id, automation.robot_id, &automation.query).await?;
    store.register_automation(id, automation).await?;
    Ok(id)
}

pub async fn remove(store: &RelationalStore, search: &SearchIndex, automation_id: Uuid) -> Result<()> {
    search.remove_percolator_query(automation_id).await?;
    store.remove_automation(automation_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn register_rejects_a_query_without_a_changeset_constraint() {
        let query = json!({ "bool": { "must": [{ "term": { "reference.identifiers.identifier": "W1" } }] } });
        assert!(validate_automation_query(&query).is_err());
    }
}
