//! Relational half of the Persistence Gateway: identifiers, decisions, robots.
//!
//! `SERIALIZABLE` transactions guard the two multi-row invariants named in
//! spec §4.A (`upsert_identifiers`, `promote_decision`); everything else
//! rides the pool's default `READ COMMITTED` isolation.

use std::collections::HashSet;

use destiny_common::{
    DestinyError, Determination, Enhancement, EnhancementContent, EnhancementRequest,
    EnhancementRequestStatus, ExternalIdentifier, IdentifierType, Reference,
    ReferenceDuplicateDecision, Result, Robot, RobotAutomation, RobotEnhancementBatch,
    RobotEnhancementBatchResult, Visibility,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct RelationalStore {
    pool: PgPool,
}

/// Input to `promote_decision` — the caller doesn't know the new row's id or
/// timestamp, only what it's deciding.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub reference_id: Uuid,
    pub canonical_reference_id: Option<Uuid>,
    pub determination: Determination,
}

impl RelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Insert a new reference row. `id` is caller-supplied so ingestion can
    /// reference it before the transaction commits.
    pub async fn create_reference(&self, id: Uuid, visibility: Visibility) -> Result<Reference> {
        let row = sqlx::query(
            r#"
            INSERT INTO references_ (id, visibility)
            VALUES ($1, $2)
            RETURNING id, visibility, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(visibility_str(visibility))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        reference_from_row(&row)
    }

    pub async fn get_reference(&self, id: Uuid) -> Result<Option<Reference>> {
        let row = sqlx::query("SELECT id, visibility, created_at, updated_at FROM references_ WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        row.as_ref().map(reference_from_row).transpose()
    }

    /// Atomic check-and-insert. Fails with `IdentifierCollision{conflicting}`
    /// if any tuple already maps to a *different* reference.
    pub async fn upsert_identifiers(
        &self,
        reference_id: Uuid,
        identifiers: &[ExternalIdentifier],
    ) -> Result<()> {
        if identifiers.is_empty() {
            return Err(DestinyError::EmptyIdentifiers);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        let mut conflicting: HashSet<Uuid> = HashSet::new();
        for ident in identifiers {
            let existing = sqlx::query(
                r#"
                SELECT reference_id FROM external_identifiers
                WHERE identifier_type = $1 AND identifier = $2
                  AND COALESCE(other_identifier_name, '') = COALESCE($3, '')
                "#,
            )
            .bind(ident.identifier_type.to_string())
            .bind(&ident.identifier)
            .bind(&ident.other_identifier_name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

            if let Some(row) = existing {
                let owner: Uuid = row
                    .try_get("reference_id")
                    .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
                if owner != reference_id {
                    conflicting.insert(owner);
                }
            }
        }

        if !conflicting.is_empty() {
            tx.rollback()
                .await
                .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
            return Err(DestinyError::IdentifierCollision {
                conflicting: conflicting.into_iter().collect(),
            });
        }

        for ident in identifiers {
            sqlx::query(
                r#"
                INSERT INTO external_identifiers
                    (id, reference_id, identifier_type, identifier, other_identifier_name)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (identifier_type, identifier, COALESCE(other_identifier_name, ''))
                DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(reference_id)
            .bind(ident.identifier_type.to_string())
            .bind(&ident.identifier)
            .bind(&ident.other_identifier_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn list_identifiers(&self, reference_id: Uuid) -> Result<Vec<ExternalIdentifier>> {
        let rows = sqlx::query(
            "SELECT reference_id, identifier_type, identifier, other_identifier_name, created_at \
             FROM external_identifiers WHERE reference_id = $1 ORDER BY created_at ASC",
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        rows.iter().map(identifier_from_row).collect()
    }

    /// Matches with their active decisions, per spec §4.A.
    pub async fn find_references_by_identifiers(
        &self,
        identifiers: &[ExternalIdentifier],
    ) -> Result<Vec<(Reference, Option<ReferenceDuplicateDecision>)>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for ident in identifiers {
            let row = sqlx::query(
                r#"
                SELECT r.id, r.visibility, r.created_at, r.updated_at
                FROM external_identifiers ei
                JOIN references_ r ON r.id = ei.reference_id
                WHERE ei.identifier_type = $1 AND ei.identifier = $2
                  AND COALESCE(ei.other_identifier_name, '') = COALESCE($3, '')
                "#,
            )
            .bind(ident.identifier_type.to_string())
            .bind(&ident.identifier)
            .bind(&ident.other_identifier_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

            if let Some(row) = row {
                let reference = reference_from_row(&row)?;
                if seen.insert(reference.id) {
                    let decision = self.get_active_decision(reference.id).await?;
                    out.push((reference, decision));
                }
            }
        }

        Ok(out)
    }

    pub async fn get_active_decision(
        &self,
        reference_id: Uuid,
    ) -> Result<Option<ReferenceDuplicateDecision>> {
        let row = sqlx::query(
            r#"
            SELECT id, reference_id, canonical_reference_id, determination, active, version, created_at
            FROM reference_duplicate_decisions
            WHERE reference_id = $1 AND active
            "#,
        )
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        row.as_ref().map(decision_from_row).transpose()
    }

    /// All references whose active decision points at `canonical_id`
    /// (the projection builder's "canonical + duplicates" set, spec §4.F).
    pub async fn find_duplicates_of(&self, canonical_id: Uuid) -> Result<Vec<Reference>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.visibility, r.created_at, r.updated_at
            FROM reference_duplicate_decisions d
            JOIN references_ r ON r.id = d.reference_id
            WHERE d.canonical_reference_id = $1 AND d.active
            ORDER BY r.id ASC
            "#,
        )
        .bind(canonical_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        rows.iter().map(reference_from_row).collect()
    }

    /// Atomically deactivates the current active decision and inserts `new`.
    /// `expected_version` must match the current active row's version
    /// (`None` if the caller believes no active decision exists yet) or this
    /// fails with `DecisionStale` — a concurrent writer got there first.
    pub async fn promote_decision(
        &self,
        new: NewDecision,
        expected_version: Option<i64>,
    ) -> Result<ReferenceDuplicateDecision> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        let current = sqlx::query(
            r#"
            SELECT version FROM reference_duplicate_decisions
            WHERE reference_id = $1 AND active
            FOR UPDATE
            "#,
        )
        .bind(new.reference_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        let current_version: Option<i64> = current
            .as_ref()
            .map(|r| r.try_get::<i64, _>("version"))
            .transpose()
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        if current_version != expected_version {
            tx.rollback()
                .await
                .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
            return Err(DestinyError::DecisionStale {
                reference_id: new.reference_id,
            });
        }

        let next_version = current_version.unwrap_or(0) + 1;

        sqlx::query(
            "UPDATE reference_duplicate_decisions SET active = false \
             WHERE reference_id = $1 AND active",
        )
        .bind(new.reference_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO reference_duplicate_decisions
                (id, reference_id, canonical_reference_id, determination, active, version)
            VALUES ($1, $2, $3, $4, true, $5)
            RETURNING id, reference_id, canonical_reference_id, determination, active, version, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.reference_id)
        .bind(new.canonical_reference_id)
        .bind(new.determination.to_string())
        .bind(next_version)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        decision_from_row(&row)
    }

    pub async fn append_enhancements(&self, enhancements: &[Enhancement]) -> Result<()> {
        for e in enhancements {
            let content = serde_json::to_value(&e.content)
                .map_err(|err| DestinyError::Validation(err.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO enhancements (id, reference_id, source, enhancement_type, robot_version, content)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(e.id)
            .bind(e.reference_id)
            .bind(&e.source)
            .bind(e.enhancement_type())
            .bind(&e.robot_version)
            .bind(content)
            .execute(&self.pool)
            .await
            .map_err(|err| DestinyError::StoreUnavailable(err.to_string()))?;
        }
        Ok(())
    }

    /// All enhancements for a reference, physically append-only, ordered so
    /// the caller can fold down to latest-per-`(source, enhancement_type)`.
    pub async fn list_enhancements(&self, reference_id: Uuid) -> Result<Vec<Enhancement>> {
        let rows = sqlx::query(
            "SELECT id, reference_id, source, robot_version, content, created_at \
             FROM enhancements WHERE reference_id = $1 ORDER BY created_at ASC",
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        rows.iter().map(enhancement_from_row).collect()
    }

    pub async fn register_robot(&self, robot: &Robot) -> Result<()> {
        sqlx::query(
            "INSERT INTO robots (id, base_url, client_secret_hash, name, owner) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(robot.id)
        .bind(&robot.base_url)
        .bind(&robot.client_secret_hash)
        .bind(&robot.name)
        .bind(&robot.owner)
        .execute(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Overwrites the stored secret hash. The plaintext secret is generated
    /// by the caller and never persisted — only its hash is (spec §3:
    /// "secret visible only at issuance/rotation").
    pub async fn rotate_secret(&self, robot_id: Uuid, new_secret_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE robots SET client_secret_hash = $1 WHERE id = $2")
            .bind(new_secret_hash)
            .bind(robot_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        if result.rows_affected() == 0 {
            warn!(%robot_id, "rotate_secret: no such robot");
            return Err(DestinyError::Validation(format!("unknown robot {robot_id}")));
        }
        Ok(())
    }

    pub async fn get_robot(&self, robot_id: Uuid) -> Result<Option<Robot>> {
        let row = sqlx::query(
            "SELECT id, base_url, client_secret_hash, name, owner, created_at FROM robots WHERE id = $1",
        )
        .bind(robot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        row.as_ref().map(robot_from_row).transpose()
    }

    /// Inserts under a caller-supplied id — the id must match the document
    /// id the automation is percolator-registered under in the search index,
    /// so the dispatcher generates it and passes it to both stores.
    pub async fn register_automation(&self, id: Uuid, automation: &RobotAutomation) -> Result<()> {
        sqlx::query("INSERT INTO robot_automations (id, robot_id, query) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(automation.robot_id)
            .bind(&automation.query)
            .execute(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn remove_automation(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM robot_automations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn get_automation(&self, id: Uuid) -> Result<Option<RobotAutomation>> {
        let row = sqlx::query("SELECT robot_id, query FROM robot_automations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        row.map(|row| {
            let robot_id: Uuid = row.try_get("robot_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
            let query: serde_json::Value = row.try_get("query").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
            Ok(RobotAutomation { robot_id, query })
        })
        .transpose()
    }

    pub async fn list_automations(&self) -> Result<Vec<(Uuid, RobotAutomation)>> {
        let rows = sqlx::query("SELECT id, robot_id, query FROM robot_automations")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row
                    .try_get("id")
                    .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
                let robot_id: Uuid = row
                    .try_get("robot_id")
                    .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
                let query: serde_json::Value = row
                    .try_get("query")
                    .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
                Ok((id, RobotAutomation { robot_id, query }))
            })
            .collect()
    }

    pub async fn create_enhancement_request(&self, request: &EnhancementRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO enhancement_requests (id, robot_id, status, reference_ids, originating_robot_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(request.id)
        .bind(request.robot_id)
        .bind(status_str(request.status))
        .bind(&request.reference_ids)
        .bind(request.originating_robot_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn get_enhancement_request(&self, id: Uuid) -> Result<Option<EnhancementRequest>> {
        let row = sqlx::query(
            "SELECT id, robot_id, status, reference_ids, originating_robot_id, created_at, updated_at \
             FROM enhancement_requests WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        row.as_ref().map(enhancement_request_from_row).transpose()
    }

    /// Requests currently sitting in `status` — used by the orchestrator's
    /// poller to find `INDEXING` requests whose rebuilds might have settled.
    pub async fn list_requests_by_status(&self, status: EnhancementRequestStatus) -> Result<Vec<EnhancementRequest>> {
        let rows = sqlx::query(
            "SELECT id, robot_id, status, reference_ids, originating_robot_id, created_at, updated_at \
             FROM enhancement_requests WHERE status = $1 ORDER BY created_at ASC",
        )
        .bind(status_str(status))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        rows.iter().map(enhancement_request_from_row).collect()
    }

    pub async fn set_request_status(&self, id: Uuid, status: EnhancementRequestStatus) -> Result<()> {
        sqlx::query("UPDATE enhancement_requests SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status_str(status))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// References from open (`RECEIVED`/`ACCEPTED`/`PROCESSING`) requests
    /// targeting `robot_id` that don't already sit inside an outstanding
    /// (no-result-yet) batch — the candidate pool `pull_batch` allocates
    /// from (spec §4.G step 1).
    pub async fn list_pullable_references(&self, robot_id: Uuid) -> Result<Vec<(Uuid, Uuid)>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id AS request_id, ref_id
            FROM enhancement_requests r, unnest(r.reference_ids) AS ref_id
            WHERE r.robot_id = $1
              AND r.status IN ('received', 'accepted', 'processing')
              AND ref_id NOT IN (
                  SELECT unnest(b.reference_ids) FROM robot_enhancement_batches b
                  WHERE b.request_id = r.id AND b.result_received_at IS NULL
              )
            ORDER BY r.created_at ASC
            "#,
        )
        .bind(robot_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let request_id: Uuid = row.try_get("request_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
                let ref_id: Uuid = row.try_get("ref_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
                Ok((request_id, ref_id))
            })
            .collect()
    }

    pub async fn create_batch(&self, batch: &RobotEnhancementBatch) -> Result<()> {
        sqlx::query(
            "INSERT INTO robot_enhancement_batches \
                (id, request_id, robot_id, reference_ids, reference_storage_url, result_storage_url, deadline) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(batch.id)
        .bind(batch.request_id)
        .bind(batch.robot_id)
        .bind(&batch.reference_ids)
        .bind(&batch.reference_storage_url)
        .bind(&batch.result_storage_url)
        .bind(batch.deadline)
        .execute(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn get_batch(&self, id: Uuid) -> Result<Option<RobotEnhancementBatch>> {
        let row = sqlx::query(
            "SELECT id, request_id, robot_id, reference_ids, reference_storage_url, result_storage_url, deadline, created_at \
             FROM robot_enhancement_batches WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        row.as_ref().map(batch_from_row).transpose()
    }

    /// References of `request_id` whose batch came back with a successful
    /// (non-`RobotGlobalError`) result — the "downloaded" half of spec
    /// §4.G's "all batch results have been downloaded" check.
    pub async fn covered_reference_ids(&self, request_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ref_id
            FROM robot_enhancement_batches b, unnest(b.reference_ids) AS ref_id
            WHERE b.request_id = $1 AND b.result_received_at IS NOT NULL AND b.result_error IS NULL
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        rows.iter()
            .map(|row| row.try_get("ref_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string())))
            .collect()
    }

    /// Whether `request_id` still has a batch outstanding (cut, no result
    /// recorded yet) — the other half of the "all results downloaded" check.
    pub async fn has_open_batch(&self, request_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM robot_enhancement_batches WHERE request_id = $1 AND result_received_at IS NULL) AS open",
        )
        .bind(request_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

        row.try_get("open").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))
    }

    pub async fn record_batch_result(&self, batch_id: Uuid, result: &RobotEnhancementBatchResult) -> Result<()> {
        sqlx::query(
            "UPDATE robot_enhancement_batches SET result_received_at = $1, result_error = $2 WHERE id = $3",
        )
        .bind(result.received_at)
        .bind(&result.error)
        .bind(batch_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

fn status_str(status: EnhancementRequestStatus) -> &'static str {
    match status {
        EnhancementRequestStatus::Received => "received",
        EnhancementRequestStatus::Accepted => "accepted",
        EnhancementRequestStatus::Processing => "processing",
        EnhancementRequestStatus::Importing => "importing",
        EnhancementRequestStatus::Indexing => "indexing",
        EnhancementRequestStatus::PartialFailed => "partial_failed",
        EnhancementRequestStatus::Failed => "failed",
        EnhancementRequestStatus::IndexingFailed => "indexing_failed",
        EnhancementRequestStatus::Completed => "completed",
    }
}

fn status_from_str(s: &str) -> Result<EnhancementRequestStatus> {
    Ok(match s {
        "received" => EnhancementRequestStatus::Received,
        "accepted" => EnhancementRequestStatus::Accepted,
        "processing" => EnhancementRequestStatus::Processing,
        "importing" => EnhancementRequestStatus::Importing,
        "indexing" => EnhancementRequestStatus::Indexing,
        "partial_failed" => EnhancementRequestStatus::PartialFailed,
        "failed" => EnhancementRequestStatus::Failed,
        "indexing_failed" => EnhancementRequestStatus::IndexingFailed,
        "completed" => EnhancementRequestStatus::Completed,
        other => return Err(DestinyError::DecisionGraphCorruption(format!("unknown request status {other}"))),
    })
}

fn enhancement_request_from_row(row: &PgRow) -> Result<EnhancementRequest> {
    let status_s: String = row.try_get("status").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
    Ok(EnhancementRequest {
        id: row.try_get("id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        robot_id: row.try_get("robot_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        status: status_from_str(&status_s)?,
        reference_ids: row.try_get("reference_ids").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        originating_robot_id: row.try_get("originating_robot_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
    })
}

fn batch_from_row(row: &PgRow) -> Result<RobotEnhancementBatch> {
    Ok(RobotEnhancementBatch {
        id: row.try_get("id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        request_id: row.try_get("request_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        robot_id: row.try_get("robot_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        reference_ids: row.try_get("reference_ids").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        reference_storage_url: row.try_get("reference_storage_url").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        result_storage_url: row.try_get("result_storage_url").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        deadline: row.try_get("deadline").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
    })
}

fn visibility_str(v: Visibility) -> &'static str {
    match v {
        Visibility::Public => "public",
        Visibility::Restricted => "restricted",
        Visibility::Hidden => "hidden",
    }
}

fn reference_from_row(row: &PgRow) -> Result<Reference> {
    let visibility_s: String = row
        .try_get("visibility")
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
    let visibility = match visibility_s.as_str() {
        "public" => Visibility::Public,
        "restricted" => Visibility::Restricted,
        "hidden" => Visibility::Hidden,
        other => return Err(DestinyError::DecisionGraphCorruption(format!("unknown visibility {other}"))),
    };
    Ok(Reference {
        id: row.try_get("id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        visibility,
        created_at: row.try_get("created_at").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
    })
}

fn identifier_from_row(row: &PgRow) -> Result<ExternalIdentifier> {
    let type_s: String = row
        .try_get("identifier_type")
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
    let identifier_type: IdentifierType = type_s
        .parse()
        .map_err(DestinyError::UnknownIdentifierType)?;
    Ok(ExternalIdentifier {
        reference_id: row.try_get("reference_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        identifier_type,
        identifier: row.try_get("identifier").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        other_identifier_name: row
            .try_get("other_identifier_name")
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
    })
}

fn decision_from_row(row: &PgRow) -> Result<ReferenceDuplicateDecision> {
    let det_s: String = row
        .try_get("determination")
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
    let determination = match det_s.as_str() {
        "CANONICAL" => Determination::Canonical,
        "DUPLICATE" => Determination::Duplicate,
        "EXACT_DUPLICATE" => Determination::ExactDuplicate,
        "DECOUPLED" => Determination::Decoupled,
        "UNRESOLVED" => Determination::Unresolved,
        other => return Err(DestinyError::DecisionGraphCorruption(format!("unknown determination {other}"))),
    };
    Ok(ReferenceDuplicateDecision {
        id: row.try_get("id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        reference_id: row.try_get("reference_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        canonical_reference_id: row
            .try_get("canonical_reference_id")
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        determination,
        active: row.try_get("active").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        version: row.try_get("version").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
    })
}

fn enhancement_from_row(row: &PgRow) -> Result<Enhancement> {
    let content_json: serde_json::Value = row
        .try_get("content")
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
    let content: EnhancementContent = serde_json::from_value(content_json)
        .map_err(|e| DestinyError::DecisionGraphCorruption(format!("malformed enhancement content: {e}")))?;
    Ok(Enhancement {
        id: row.try_get("id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        reference_id: row.try_get("reference_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        source: row.try_get("source").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        robot_version: row.try_get("robot_version").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        content,
        created_at: row.try_get("created_at").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
    })
}

fn robot_from_row(row: &PgRow) -> Result<Robot> {
    Ok(Robot {
        id: row.try_get("id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        base_url: row.try_get("base_url").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        client_secret_hash: row
            .try_get("client_secret_hash")
            .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        name: row.try_get("name").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        owner: row.try_get("owner").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?,
    })
}
