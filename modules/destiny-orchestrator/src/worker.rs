//! Polls `INDEXING` requests and finalizes the ones whose rebuild tasks
//! have all settled. Grounded on `destiny-projection::worker::run_once`'s
//! lease-loop shape, adapted from consuming a task bus queue to sweeping a
//! status column — there's no queue here, just a handful of in-flight
//! requests to recheck each tick.

use destiny_common::EnhancementRequestStatus;
use destiny_engine::EventPersister;
use tracing::{error, info};

use crate::OrchestratorEngine;

/// Checks every `INDEXING` request once and finalizes the ones that are
/// ready. Returns the number finalized. Callers loop this with their own
/// idle backoff between sweeps.
pub async fn run_once<P: EventPersister>(engine: &OrchestratorEngine<P>) -> usize {
    let deps = engine.deps();
    let requests = match deps.store.list_requests_by_status(EnhancementRequestStatus::Indexing).await {
        Ok(requests) => requests,
        Err(e) => {
            error!(error = %e, "orchestrator worker: failed to list indexing requests");
            return 0;
        }
    };

    let mut finalized = 0;
    for request in requests {
        match crate::batch::finalize_request(engine, request.id).await {
            Ok(true) => {
                info!(request_id = %request.id, "enhancement request finalized");
                finalized += 1;
            }
            Ok(false) => {}
            Err(e) => error!(request_id = %request.id, error = %e, "orchestrator worker: finalize_request failed"),
        }
    }
    finalized
}
