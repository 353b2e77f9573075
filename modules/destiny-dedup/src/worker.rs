//! Consumes `dedup` tasks off the task bus — one `decide(reference_id)` run
//! per lease. Grounded on `destiny-projection::worker`'s lease loop; a
//! `DecisionStale` race that exhausts its retries inside `decide` still
//! resolves to an `Outcome` (see `router.rs`), so unlike the projection
//! worker this one never nacks for retry on business outcomes — only on a
//! dispatch failure that means `decide` didn't run to completion at all.

use chrono::Duration;
use destiny_engine::EventPersister;
use destiny_taskbus::TaskBus;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::DedupEngine;

pub const QUEUE: &str = "dedup";

/// Leases and processes one batch of pending dedup tasks, up to `max`.
/// Returns the number processed (acked or nacked) — `0` means the queue was
/// empty. Callers loop this with their own idle backoff between calls.
pub async fn run_once<P: EventPersister>(bus: &TaskBus, engine: &DedupEngine<P>, worker_id: &str, lease_for: Duration, max: usize) -> usize {
    let mut processed = 0;
    for _ in 0..max {
        let leased = match bus.lease(QUEUE, lease_for, worker_id).await {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "dedup worker: lease failed");
                break;
            }
        };

        let reference_id = leased.payload.get("reference_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok());

        let Some(reference_id) = reference_id else {
            warn!(task_id = %leased.id, "dedup worker: malformed payload, acking to drop");
            let _ = bus.ack(leased.id).await;
            processed += 1;
            continue;
        };

        match engine.decide(reference_id).await {
            Ok(state) => {
                info!(reference_id = %reference_id, outcome = ?state.outcome, "dedup decision settled");
                let _ = bus.ack(leased.id).await;
            }
            Err(e) => {
                warn!(reference_id = %reference_id, error = %e, "dedup dispatch failed, nacking for retry");
                let _ = bus.nack(leased.id, &e.to_string()).await;
            }
        }
        processed += 1;
    }
    processed
}
