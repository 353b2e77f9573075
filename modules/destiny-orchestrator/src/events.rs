//! Event vocabulary for the enhancement request lifecycle (spec §4.G's
//! state machine). Unlike the Dedup Engine's four fixed phases, most of
//! this lifecycle's I/O (batch allocation, result validation) happens
//! outside the dispatch loop, in `crate::batch` — these events exist to
//! record the lifecycle's terminal facts and drive the two places where a
//! status transition genuinely depends on more than one caller's say-so.

use destiny_engine::EventLike;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestOutcome {
    Completed,
    PartialFailed,
    IndexingFailed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    /// A batch was just cut for this request (`pull_batch`). Bumps
    /// `RECEIVED`/`ACCEPTED` to `PROCESSING` the first time it fires.
    BatchAllocated { request_id: Uuid, batch_id: Uuid },
    /// A robot reported a whole-batch failure. Terminal.
    BatchFailed { request_id: Uuid, batch_id: Uuid, reason: String },
    /// Every batch for the request has a successful result recorded and
    /// none remain outstanding — moves `PROCESSING` to `IMPORTING`, enqueues
    /// projection rebuilds, and moves to `INDEXING`.
    AllResultsDownloaded { request_id: Uuid, canonical_ids: Vec<Uuid> },
    /// The rebuilds this request kicked off have all settled. Terminal.
    Settled { request_id: Uuid, outcome: RequestOutcome },
}

impl OrchestratorEvent {
    pub fn request_id(&self) -> Uuid {
        match self {
            OrchestratorEvent::BatchAllocated { request_id, .. }
            | OrchestratorEvent::BatchFailed { request_id, .. }
            | OrchestratorEvent::AllResultsDownloaded { request_id, .. }
            | OrchestratorEvent::Settled { request_id, .. } => *request_id,
        }
    }
}

impl EventLike for OrchestratorEvent {
    fn event_type_str(&self) -> String {
        match self {
            OrchestratorEvent::BatchAllocated { .. } => "orchestrator_batch_allocated",
            OrchestratorEvent::BatchFailed { .. } => "orchestrator_batch_failed",
            OrchestratorEvent::AllResultsDownloaded { .. } => "orchestrator_all_results_downloaded",
            OrchestratorEvent::Settled { .. } => "orchestrator_settled",
        }
        .to_string()
    }

    fn to_persist_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
