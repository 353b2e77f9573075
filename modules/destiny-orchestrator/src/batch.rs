//! Batch allocation and result handling for the enhancement request
//! lifecycle. Deciding what goes into a batch, writing the request payload
//! to blob storage, validating a robot's uploaded result and deciding when
//! a request has actually finished all live outside the dispatch loop —
//! `OrchestratorRouter` only reacts once one of these functions has already
//! done the I/O and knows what happened.

use std::collections::HashSet;

use chrono::{Duration as ChronoDuration, Utc};
use destiny_common::{
    DeduplicatedReferenceProjection, DestinyError, EnhancementPayload, EnhancementRequestStatus,
    ProjectedEnhancement, ProjectedIdentifier, Result, RobotEnhancementBatch,
    RobotEnhancementBatchResult, RobotResultLine,
};
use destiny_engine::EventPersister;
use sqlx::Row;
use uuid::Uuid;

use crate::events::{OrchestratorEvent, RequestOutcome};
use crate::state::OrchestratorDeps;
use crate::OrchestratorEngine;
use destiny_blob::BlobKey;

const BATCH_DEADLINE_SECS: i64 = 3600;

/// What the HTTP layer hands a robot after a successful pull.
pub struct PulledBatch {
    pub batch_id: Uuid,
    pub reference_storage_url: String,
    pub result_storage_url: String,
    pub deadline: chrono::DateTime<Utc>,
}

/// Cuts a batch of up to `max_size` references for `robot_id` from its open
/// requests, oldest request first, and writes the request payload to blob
/// storage. Returns `None` if there's nothing pullable right now.
///
/// A batch is scoped to exactly one request even when several requests for
/// the same robot are open simultaneously — `list_pullable_references`
/// already orders candidates oldest-request-first, so a robot drains its
/// oldest backlog before a newer request's references are offered.
pub async fn pull_batch<P: EventPersister>(
    engine: &OrchestratorEngine<P>,
    robot_id: Uuid,
    max_size: usize,
) -> Result<Option<PulledBatch>> {
    let deps = engine.deps();
    let candidates = deps.store.list_pullable_references(robot_id).await?;
    if candidates.is_empty() {
        return Ok(None);
    }

    let request_id = candidates[0].0;
    let reference_ids: Vec<Uuid> = candidates
        .into_iter()
        .take_while(|(rid, _)| *rid == request_id)
        .map(|(_, ref_id)| ref_id)
        .take(max_size.max(1))
        .collect();

    let batch_id = Uuid::new_v4();
    let mut snapshots = Vec::with_capacity(reference_ids.len());
    for reference_id in &reference_ids {
        snapshots.push(snapshot_reference(deps, *reference_id).await?);
    }

    let request_key = BlobKey::Batch { batch_id, name: "request.jsonl".to_string() };
    let mut body = Vec::new();
    for snapshot in &snapshots {
        serde_json::to_writer(&mut body, snapshot)
            .map_err(|e| DestinyError::BlobUnavailable(format!("encode batch request: {e}")))?;
        body.push(b'\n');
    }
    deps.blob.put(&request_key, body).await?;

    let reference_storage_url = deps.blob.presigned_download_url(&request_key).await?;
    let result_key = BlobKey::Batch { batch_id, name: "result.jsonl".to_string() };
    let result_storage_url = deps.blob.presigned_upload_url(&result_key).await?;
    let deadline = Utc::now() + ChronoDuration::seconds(BATCH_DEADLINE_SECS);

    deps.store
        .create_batch(&RobotEnhancementBatch {
            id: batch_id,
            request_id,
            robot_id,
            reference_ids,
            reference_storage_url: reference_storage_url.clone(),
            result_storage_url: result_storage_url.clone(),
            deadline,
            created_at: Utc::now(),
        })
        .await?;

    engine
        .apply(OrchestratorEvent::BatchAllocated { request_id, batch_id })
        .await?;

    Ok(Some(PulledBatch { batch_id, reference_storage_url, result_storage_url, deadline }))
}

/// Folds a reference's current projection for a batch's request payload.
/// Prefers the already-built read model (spec §4.F) over re-querying
/// Postgres from scratch — it's the same data, and the projection builder
/// keeps it current on every write that matters. Falls back to a
/// single-member projection built straight from the relational store for a
/// reference the dedup engine and projection builder haven't touched yet
/// (fresh ingest, still `UNRESOLVED`).
async fn snapshot_reference(
    deps: &OrchestratorDeps,
    reference_id: Uuid,
) -> Result<DeduplicatedReferenceProjection> {
    let canonical_id = governing_canonical(deps, reference_id).await?;

    if let Some(doc) = deps.search.get(canonical_id).await? {
        if let Some(projection) = doc.get("reference").cloned() {
            if let Ok(projection) = serde_json::from_value(projection) {
                return Ok(projection);
            }
        }
    }

    let identifiers = deps
        .store
        .list_identifiers(canonical_id)
        .await?
        .into_iter()
        .map(|id| ProjectedIdentifier {
            reference_id: id.reference_id,
            identifier_type: id.identifier_type,
            identifier: id.identifier,
            other_identifier_name: id.other_identifier_name,
        })
        .collect();
    let enhancements = deps
        .store
        .list_enhancements(canonical_id)
        .await?
        .into_iter()
        .map(|e| ProjectedEnhancement { reference_id: e.reference_id, source: e.source, content: e.content })
        .collect();

    Ok(DeduplicatedReferenceProjection {
        canonical_id,
        member_reference_ids: vec![canonical_id],
        identifiers,
        enhancements,
    })
}

/// The canonical reference `reference_id` currently belongs under — itself,
/// unless it has an active `DUPLICATE`/`EXACT_DUPLICATE` decision.
async fn governing_canonical(deps: &OrchestratorDeps, reference_id: Uuid) -> Result<Uuid> {
    match deps.store.get_active_decision(reference_id).await? {
        Some(decision) => Ok(decision.canonical_reference_id.unwrap_or(reference_id)),
        None => Ok(reference_id),
    }
}

/// Records a robot's uploaded result for `batch_id`. `body` is the raw
/// result blob (whole-batch error report, or a JSONL stream of
/// `RobotResultLine`s, one per reference the batch covered).
///
/// A line that names a reference the batch didn't cover, or a batch that's
/// missing lines for references it did cover, is recorded as a validation
/// error but never blocks the import of the lines that *did* come back
/// clean — spec §4.G's "partial failure never discards good data".
pub async fn record_result<P: EventPersister>(
    engine: &OrchestratorEngine<P>,
    batch_id: Uuid,
    global_error: Option<String>,
) -> Result<()> {
    let deps = engine.deps();
    let batch = deps
        .store
        .get_batch(batch_id)
        .await?
        .ok_or_else(|| DestinyError::Validation(format!("no such batch {batch_id}")))?;

    deps.store
        .record_batch_result(
            batch_id,
            &RobotEnhancementBatchResult { batch_id, error: global_error.clone(), received_at: Utc::now() },
        )
        .await?;

    if let Some(reason) = global_error {
        record_batch_validation(deps, batch_id, true).await?;
        engine
            .apply(OrchestratorEvent::BatchFailed { request_id: batch.request_id, batch_id, reason })
            .await?;
        return Ok(());
    }

    let result_key = BlobKey::Batch { batch_id, name: "result.jsonl".to_string() };
    let mut reader = deps.blob.open_jsonl(&result_key).await?;
    let mut covered: HashSet<Uuid> = HashSet::new();
    let mut had_errors = false;

    while let Some(line) = reader.next_line().await {
        let bytes = match line {
            destiny_blob::JsonlLine::Line { bytes, .. } => bytes,
            destiny_blob::JsonlLine::Malformed { line_no, reason } => {
                tracing::warn!(%batch_id, line_no, reason, "malformed batch result line");
                had_errors = true;
                continue;
            }
        };

        let parsed: Result<RobotResultLine> = serde_json::from_slice(&bytes)
            .map_err(|e| DestinyError::ParseError(format!("batch result line: {e}")));
        match parsed {
            Ok(RobotResultLine::Enhancement(payload)) => {
                if !batch.reference_ids.contains(&payload.reference_id) {
                    tracing::warn!(%batch_id, reference_id = %payload.reference_id, "result line for a reference outside this batch");
                    had_errors = true;
                    continue;
                }
                import_enhancement(deps, &payload).await?;
                covered.insert(payload.reference_id);
            }
            Ok(RobotResultLine::LinkedError(err)) => {
                tracing::warn!(%batch_id, reference_id = %err.reference_id, reason = %err.reason, "robot reported a linked error");
                had_errors = true;
                covered.insert(err.reference_id);
            }
            Err(e) => {
                tracing::warn!(%batch_id, error = %e, "unparseable batch result line");
                had_errors = true;
            }
        }
    }

    if covered.len() < batch.reference_ids.len() {
        had_errors = true;
    }
    record_batch_validation(deps, batch_id, had_errors).await?;

    maybe_finish_downloading(engine, batch.request_id).await?;
    Ok(())
}

async fn import_enhancement(deps: &OrchestratorDeps, payload: &EnhancementPayload) -> Result<()> {
    deps.store
        .append_enhancements(&[destiny_common::Enhancement {
            id: Uuid::new_v4(),
            reference_id: payload.reference_id,
            source: payload.source.clone(),
            robot_version: payload.robot_version.clone(),
            content: payload.content.clone(),
            created_at: Utc::now(),
        }])
        .await
}

/// Fires `AllResultsDownloaded` once every reference in the request has a
/// clean result recorded and no batch remains outstanding. Checked fresh
/// after every batch result — import happens per-batch, so there's no
/// simple counter to track without risking drift.
async fn maybe_finish_downloading<P: EventPersister>(
    engine: &OrchestratorEngine<P>,
    request_id: Uuid,
) -> Result<()> {
    let deps = engine.deps();
    let request = deps
        .store
        .get_enhancement_request(request_id)
        .await?
        .ok_or_else(|| DestinyError::Validation(format!("no such request {request_id}")))?;

    if deps.store.has_open_batch(request_id).await? {
        return Ok(());
    }

    let covered: HashSet<Uuid> = deps.store.covered_reference_ids(request_id).await?.into_iter().collect();
    let wanted: HashSet<Uuid> = request.reference_ids.iter().copied().collect();
    if !wanted.is_subset(&covered) {
        return Ok(());
    }

    let canonical_ids: Vec<Uuid> = {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for reference_id in &request.reference_ids {
            let canonical_id = governing_canonical(deps, *reference_id).await?;
            if seen.insert(canonical_id) {
                out.push(canonical_id);
            }
        }
        out
    };

    engine
        .apply(OrchestratorEvent::AllResultsDownloaded { request_id, canonical_ids })
        .await?;
    Ok(())
}

async fn record_batch_validation(deps: &OrchestratorDeps, batch_id: Uuid, had_errors: bool) -> Result<()> {
    sqlx::query(
        "INSERT INTO batch_validation (batch_id, had_errors) VALUES ($1, $2) \
         ON CONFLICT (batch_id) DO UPDATE SET had_errors = EXCLUDED.had_errors",
    )
    .bind(batch_id)
    .bind(had_errors)
    .execute(&deps.pool)
    .await
    .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

pub async fn record_pending_rebuild(
    deps: &OrchestratorDeps,
    request_id: Uuid,
    task_id: Uuid,
    canonical_reference_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO pending_rebuilds (request_id, task_id, canonical_reference_id) VALUES ($1, $2, $3) \
         ON CONFLICT (request_id, task_id) DO NOTHING",
    )
    .bind(request_id)
    .bind(task_id)
    .bind(canonical_reference_id)
    .execute(&deps.pool)
    .await
    .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
    Ok(())
}

/// Polls a request's outstanding rebuild tasks and, once every one of them
/// has settled, flips the request to its terminal status and emits
/// `Settled`. Called periodically by the orchestrator's worker loop — there
/// is no push notification from the projection rebuild worker back into
/// this crate, to avoid a circular dependency between the two.
pub async fn finalize_request<P: EventPersister>(engine: &OrchestratorEngine<P>, request_id: Uuid) -> Result<bool> {
    let deps = engine.deps();
    let rows = sqlx::query("SELECT task_id FROM pending_rebuilds WHERE request_id = $1")
        .bind(request_id)
        .fetch_all(&deps.pool)
        .await
        .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;

    let mut any_pending = false;
    let mut any_dlq = false;
    for row in &rows {
        let task_id: Uuid = row.try_get("task_id").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
        match deps.taskbus.task_status(task_id).await? {
            Some(status) if status == "done" => {}
            Some(status) if status == "dlq" => any_dlq = true,
            _ => any_pending = true,
        }
    }

    if any_pending {
        return Ok(false);
    }

    let had_batch_errors = batch_had_errors(deps, request_id).await?;
    let outcome = match (any_dlq, had_batch_errors) {
        (true, _) => RequestOutcome::IndexingFailed,
        (false, true) => RequestOutcome::PartialFailed,
        (false, false) => RequestOutcome::Completed,
    };

    let status = match outcome {
        RequestOutcome::Completed => EnhancementRequestStatus::Completed,
        RequestOutcome::PartialFailed => EnhancementRequestStatus::PartialFailed,
        RequestOutcome::IndexingFailed => EnhancementRequestStatus::IndexingFailed,
        RequestOutcome::Failed => EnhancementRequestStatus::Failed,
    };
    deps.store.set_request_status(request_id, status).await?;

    engine.apply(OrchestratorEvent::Settled { request_id, outcome }).await?;
    Ok(true)
}

async fn batch_had_errors(deps: &OrchestratorDeps, request_id: Uuid) -> Result<bool> {
    let row = sqlx::query(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM batch_validation v
            JOIN robot_enhancement_batches b ON b.id = v.batch_id
            WHERE b.request_id = $1 AND v.had_errors
        ) AS had_errors
        "#,
    )
    .bind(request_id)
    .fetch_one(&deps.pool)
    .await
    .map_err(|e| DestinyError::StoreUnavailable(e.to_string()))?;
    row.try_get("had_errors").map_err(|e| DestinyError::StoreUnavailable(e.to_string()))
}
