//! Status transitions for the enhancement request lifecycle. All the heavy
//! I/O (allocation, result download/validation) lives in `crate::batch` and
//! runs before an event reaches the dispatch loop — this router only
//! applies the bookkeeping a transition implies once the I/O has settled,
//! mirroring the Dedup Engine's split between phase functions (I/O) and
//! `resolve_action` (pure decision over already-fetched state).

use async_trait::async_trait;
use destiny_common::{EnhancementRequestStatus, Result as DestinyResult};
use destiny_engine::Router;
use destiny_events::StoredEvent;
use destiny_taskbus::NewTask;
use tracing::warn;

use crate::events::{OrchestratorEvent, RequestOutcome};
use crate::state::{OrchestratorDeps, OrchestratorState};

pub struct OrchestratorRouter;

#[async_trait]
impl Router<OrchestratorEvent, OrchestratorState, OrchestratorDeps> for OrchestratorRouter {
    async fn route(
        &self,
        event: &OrchestratorEvent,
        _stored: &StoredEvent,
        _state: &mut OrchestratorState,
        deps: &OrchestratorDeps,
    ) -> anyhow::Result<Vec<OrchestratorEvent>> {
        Ok(match event {
            OrchestratorEvent::BatchAllocated { request_id, .. } => {
                on_batch_allocated(deps, *request_id).await?
            }
            OrchestratorEvent::BatchFailed { request_id, reason, .. } => {
                on_batch_failed(deps, *request_id, reason).await?
            }
            OrchestratorEvent::AllResultsDownloaded { request_id, canonical_ids } => {
                on_all_results_downloaded(deps, *request_id, canonical_ids).await?
            }
            OrchestratorEvent::Settled { .. } => vec![],
        })
    }
}

async fn on_batch_allocated(deps: &OrchestratorDeps, request_id: uuid::Uuid) -> DestinyResult<Vec<OrchestratorEvent>> {
    if let Some(request) = deps.store.get_enhancement_request(request_id).await? {
        if matches!(request.status, EnhancementRequestStatus::Received | EnhancementRequestStatus::Accepted) {
            deps.store.set_request_status(request_id, EnhancementRequestStatus::Processing).await?;
        }
    }
    Ok(vec![])
}

async fn on_batch_failed(deps: &OrchestratorDeps, request_id: uuid::Uuid, reason: &str) -> DestinyResult<Vec<OrchestratorEvent>> {
    warn!(%request_id, reason, "robot reported a global batch failure");
    deps.store.set_request_status(request_id, EnhancementRequestStatus::Failed).await?;
    Ok(vec![OrchestratorEvent::Settled { request_id, outcome: RequestOutcome::Failed }])
}

async fn on_all_results_downloaded(
    deps: &OrchestratorDeps,
    request_id: uuid::Uuid,
    canonical_ids: &[uuid::Uuid],
) -> DestinyResult<Vec<OrchestratorEvent>> {
    deps.store.set_request_status(request_id, EnhancementRequestStatus::Importing).await?;
    deps.store.set_request_status(request_id, EnhancementRequestStatus::Indexing).await?;

    // The robot(s) whose work produced this changeset — carried on the
    // rebuild task so the automation dispatcher can refuse to turn a robot's
    // own result back into a new request for that same robot.
    let mut triggering_robot_ids = Vec::new();
    if let Some(request) = deps.store.get_enhancement_request(request_id).await? {
        triggering_robot_ids.push(request.robot_id);
        if let Some(originating) = request.originating_robot_id {
            triggering_robot_ids.push(originating);
        }
    }

    for canonical_id in canonical_ids {
        let task_id = deps
            .taskbus
            .enqueue(NewTask {
                queue: "projection_rebuild".to_string(),
                payload: serde_json::json!({
                    "canonical_reference_id": canonical_id,
                    "triggering_robot_ids": triggering_robot_ids,
                }),
                idempotency_key: Some(format!("projection-rebuild-{canonical_id}")),
                max_attempts: 5,
            })
            .await?;
        crate::batch::record_pending_rebuild(deps, request_id, task_id, *canonical_id).await?;
    }

    Ok(vec![])
}
