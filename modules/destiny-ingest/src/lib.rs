//! Ingestion Pipeline: per-entry parse → validate → exact-duplicate
//! shortcut → collision resolution → persist → enqueue dedup, run with
//! bounded fan-out across one import batch.
//!
//! Grounded in `rootsignal-scout::pipeline::handlers::creation` for the
//! parse-validate-persist-emit-events shape: that handler turns one scraped
//! signal into World/System/Citation events; this pipeline turns one
//! imported reference into persisted rows plus a dedup task, but the same
//! "read pending state, do one I/O pass, return what happened" discipline
//! applies.

pub mod collision;
pub mod entry;

use std::collections::BTreeSet;
use std::sync::Arc;

use destiny_blob::{JsonlLine, JsonlReader};
use destiny_common::{
    validate_identifier_value, CollisionStrategy, DestinyError, ExternalIdentifier, ImportResult,
    ImportResultStatus, Reference, Result, Visibility,
};
use destiny_store::RelationalStore;
use destiny_taskbus::{NewTask, TaskBus};
use tokio::sync::Semaphore;
use uuid::Uuid;

pub use entry::{entry_digest, EnhancementInput, IdentifierInput, ImportEntry};

pub struct IngestPipeline {
    store: RelationalStore,
    taskbus: Arc<TaskBus>,
    fanout: usize,
}

impl IngestPipeline {
    pub fn new(store: RelationalStore, taskbus: TaskBus, fanout: usize) -> Self {
        Self { store, taskbus: Arc::new(taskbus), fanout: fanout.max(1) }
    }

    /// Processes every line of an already-parsed batch, bounded to
    /// `self.fanout` entries in flight at once. Partial failure never
    /// aborts the batch — spec.md §4.D: "the batch itself never reports
    /// failed", every entry just gets its own terminal `ImportResult`.
    pub async fn process_batch(
        &self,
        lines: Vec<(u64, serde_json::Result<ImportEntry>)>,
        collision_strategy: CollisionStrategy,
    ) -> Vec<(u64, ImportResult)> {
        let semaphore = Arc::new(Semaphore::new(self.fanout));
        let mut set = tokio::task::JoinSet::new();

        for (line_no, parsed) in lines {
            let permit = semaphore.clone();
            let store = self.store.clone();
            let bus = self.taskbus.clone();
            set.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                let result = match parsed {
                    Ok(entry) => process_one(&store, &bus, entry, collision_strategy).await,
                    Err(e) => ImportResult {
                        record_id: Uuid::new_v4(),
                        status: ImportResultStatus::Failed,
                        reference_id: None,
                        reason: Some(format!("parse error: {e}")),
                        colliding_reference_ids: vec![],
                    },
                };
                (line_no, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => tracing::warn!(error = %e, "ingest task panicked"),
            }
        }
        results.sort_by_key(|(line_no, _)| *line_no);
        results
    }

    /// Drains a stored import file line-by-line and processes it as a batch.
    /// A `JsonlLine::Malformed` line (oversized, or an I/O hiccup mid-read)
    /// becomes a `Failed` result directly — it never reaches step 1's JSON
    /// parse, so it's folded in here rather than inside `process_batch`.
    pub async fn process_jsonl(
        &self,
        mut reader: JsonlReader,
        collision_strategy: CollisionStrategy,
    ) -> Vec<(u64, ImportResult)> {
        let mut parsed = Vec::new();
        let mut malformed = Vec::new();

        while let Some(line) = reader.next_line().await {
            match line {
                JsonlLine::Line { line_no, bytes } => {
                    parsed.push((line_no, serde_json::from_slice::<ImportEntry>(&bytes)));
                }
                JsonlLine::Malformed { line_no, reason } => {
                    malformed.push((
                        line_no,
                        ImportResult {
                            record_id: Uuid::new_v4(),
                            status: ImportResultStatus::Failed,
                            reference_id: None,
                            reason: Some(reason),
                            colliding_reference_ids: vec![],
                        },
                    ));
                }
            }
        }

        let mut results = self.process_batch(parsed, collision_strategy).await;
        results.extend(malformed);
        results.sort_by_key(|(line_no, _)| *line_no);
        results
    }
}

fn determine_id_ref(identifiers: &[IdentifierInput]) -> Vec<ExternalIdentifier> {
    identifiers
        .iter()
        .map(|i| ExternalIdentifier {
            reference_id: Uuid::nil(),
            identifier_type: i.identifier_type,
            identifier: i.identifier.clone(),
            other_identifier_name: i.other_identifier_name.clone(),
            created_at: chrono::Utc::now(),
        })
        .collect()
}

async fn process_one(
    store: &RelationalStore,
    taskbus: &TaskBus,
    entry: ImportEntry,
    collision_strategy: CollisionStrategy,
) -> ImportResult {
    let record_id = Uuid::new_v4();

    if entry.identifiers.is_empty() {
        return ImportResult {
            record_id,
            status: ImportResultStatus::Failed,
            reference_id: None,
            reason: Some("reference must carry at least one identifier".to_string()),
            colliding_reference_ids: vec![],
        };
    }

    for ident in &entry.identifiers {
        if let Err(reason) =
            validate_identifier_value(ident.identifier_type, &ident.identifier, &ident.other_identifier_name)
        {
            return ImportResult {
                record_id,
                status: ImportResultStatus::Failed,
                reference_id: None,
                reason: Some(reason),
                colliding_reference_ids: vec![],
            };
        }
    }

    match try_process(store, taskbus, record_id, &entry, collision_strategy).await {
        Ok(result) => result,
        Err(e) => ImportResult {
            record_id,
            status: ImportResultStatus::Failed,
            reference_id: None,
            reason: Some(e.to_string()),
            colliding_reference_ids: vec![],
        },
    }
}

async fn try_process(
    store: &RelationalStore,
    taskbus: &TaskBus,
    record_id: Uuid,
    entry: &ImportEntry,
    collision_strategy: CollisionStrategy,
) -> Result<ImportResult> {
    let incoming_digest = entry_digest(&entry.identifiers, &entry.enhancements);

    if let Some(existing) = find_subsuming_reference(store, &entry.identifiers, &incoming_digest).await? {
        return register_exact_duplicate(store, record_id, existing).await;
    }

    let lookup_ids = determine_id_ref(&entry.identifiers);
    let new_id = Uuid::new_v4();
    let visibility = entry.visibility.unwrap_or(Visibility::Public);
    store.create_reference(new_id, visibility).await?;

    match store.upsert_identifiers(new_id, &lookup_ids).await {
        Ok(()) => {
            let enhancements: Vec<_> = entry
                .enhancements
                .iter()
                .cloned()
                .map(|e| destiny_common::Enhancement {
                    id: Uuid::new_v4(),
                    reference_id: new_id,
                    source: e.source,
                    robot_version: e.robot_version,
                    content: e.content,
                    created_at: chrono::Utc::now(),
                })
                .collect();
            if !enhancements.is_empty() {
                store.append_enhancements(&enhancements).await?;
            }
            enqueue_dedup(taskbus, record_id, new_id, 0).await
        }
        Err(DestinyError::IdentifierCollision { conflicting }) => {
            if conflicting.len() > 1 {
                return Ok(ImportResult {
                    record_id,
                    status: ImportResultStatus::Failed,
                    reference_id: None,
                    reason: Some("identifiers name more than one existing reference".to_string()),
                    colliding_reference_ids: conflicting,
                });
            }
            let existing_id = conflicting[0];
            match collision_strategy {
                CollisionStrategy::Fail => Ok(ImportResult {
                    record_id,
                    status: ImportResultStatus::Failed,
                    reference_id: None,
                    reason: Some("identifier collision with existing reference".to_string()),
                    colliding_reference_ids: vec![existing_id],
                }),
                CollisionStrategy::Discard => Ok(ImportResult {
                    record_id,
                    status: ImportResultStatus::Completed,
                    reference_id: Some(existing_id),
                    reason: None,
                    colliding_reference_ids: vec![existing_id],
                }),
                strategy => {
                    let to_append =
                        collision::resolve_enhancements(store, existing_id, strategy, &entry.enhancements).await?;
                    if !to_append.is_empty() {
                        store.append_enhancements(&to_append).await?;
                    }
                    Ok(ImportResult {
                        record_id,
                        status: ImportResultStatus::Completed,
                        reference_id: Some(existing_id),
                        reason: None,
                        colliding_reference_ids: vec![existing_id],
                    })
                }
            }
        }
        Err(e) => Err(e),
    }
}

/// Phase 3 of spec.md §4.D: does any reference sharing an identifier with
/// this entry already carry everything this entry would add?
async fn find_subsuming_reference(
    store: &RelationalStore,
    identifiers: &[IdentifierInput],
    incoming_digest: &BTreeSet<String>,
) -> Result<Option<Reference>> {
    let lookup_ids = determine_id_ref(identifiers);
    let matches = store.find_references_by_identifiers(&lookup_ids).await?;

    for (candidate, _decision) in matches {
        let existing_identifiers = store.list_identifiers(candidate.id).await?;
        let existing_enhancements = store.list_enhancements(candidate.id).await?;
        let existing_digest = existing_digest_set(&existing_identifiers, &existing_enhancements);
        if entry::is_subsumed_by(incoming_digest, &existing_digest) {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

fn existing_digest_set(
    identifiers: &[ExternalIdentifier],
    enhancements: &[destiny_common::Enhancement],
) -> BTreeSet<String> {
    let idents: Vec<IdentifierInput> = identifiers
        .iter()
        .map(|i| IdentifierInput {
            identifier_type: i.identifier_type,
            identifier: i.identifier.clone(),
            other_identifier_name: i.other_identifier_name.clone(),
        })
        .collect();
    let enh: Vec<EnhancementInput> = enhancements
        .iter()
        .map(|e| EnhancementInput {
            source: e.source.clone(),
            robot_version: e.robot_version.clone(),
            content: e.content.clone(),
        })
        .collect();
    entry_digest(&idents, &enh)
}

/// Step 3's "skip import": the incoming record already exists byte-for-byte
/// under `existing.id`, so there is nothing left to persist — no new
/// reference, no decision row (a decision records that two *distinct*
/// references are duplicates of each other, which doesn't apply when the
/// submission matches the canonical reference itself). The caller gets
/// `existing.id` straight back.
async fn register_exact_duplicate(_store: &RelationalStore, record_id: Uuid, existing: Reference) -> Result<ImportResult> {
    Ok(ImportResult {
        record_id,
        status: ImportResultStatus::Completed,
        reference_id: Some(existing.id),
        reason: None,
        colliding_reference_ids: vec![existing.id],
    })
}

/// Step 6: enqueue a dedup task keyed by `reference_id+decision_epoch`
/// (epoch 0 — the reference has no decision history yet). Failure here is
/// fatal to the result, per spec.md §4.D step 6: a persisted-but-never-
/// deduplicated reference is worse than a visibly failed import.
async fn enqueue_dedup(taskbus: &TaskBus, record_id: Uuid, reference_id: Uuid, epoch: u64) -> Result<ImportResult> {
    let enqueued = taskbus
        .enqueue(NewTask {
            queue: "dedup".to_string(),
            payload: serde_json::json!({ "reference_id": reference_id }),
            idempotency_key: Some(format!("{reference_id}+{epoch}")),
            max_attempts: 5,
        })
        .await;

    match enqueued {
        Ok(_) => Ok(ImportResult {
            record_id,
            status: ImportResultStatus::Completed,
            reference_id: Some(reference_id),
            reason: None,
            colliding_reference_ids: vec![],
        }),
        Err(e) => Ok(ImportResult {
            record_id,
            status: ImportResultStatus::Failed,
            reference_id: Some(reference_id),
            reason: Some(format!("persisted but failed to enqueue dedup task: {e}")),
            colliding_reference_ids: vec![],
        }),
    }
}
