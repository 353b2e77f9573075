//! Consumes `projection_rebuild` tasks off the task bus.
//!
//! Grounded on the task bus's own contract (spec §4.C): at-least-once
//! delivery, handlers idempotent on the keyed operation (here,
//! `canonical_reference_id` — rebuilding twice is a no-op by construction).
//! A failed rebuild is nacked and redelivered rather than dropped.

use chrono::Duration;
use destiny_taskbus::{NewTask, TaskBus};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::builder::ProjectionBuilder;

pub const QUEUE: &str = "projection_rebuild";
pub const DISPATCH_QUEUE: &str = "enhancement_dispatch";

/// Leases and processes one batch of pending rebuild tasks, up to `max`.
/// Returns the number processed (acked or nacked) — `0` means the queue was
/// empty. Callers loop this with their own idle backoff between calls.
pub async fn run_once(bus: &TaskBus, builder: &ProjectionBuilder, worker_id: &str, lease_for: Duration, max: usize) -> usize {
    let mut processed = 0;
    for _ in 0..max {
        let leased = match bus.lease(QUEUE, lease_for, worker_id).await {
            Ok(Some(task)) => task,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "projection worker: lease failed");
                break;
            }
        };

        let canonical_id = leased
            .payload
            .get("canonical_reference_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        let Some(canonical_id) = canonical_id else {
            warn!(task_id = %leased.id, "projection worker: malformed payload, acking to drop");
            let _ = bus.ack(leased.id).await;
            processed += 1;
            continue;
        };

        match builder.rebuild(canonical_id).await {
            Ok(hits) => {
                info!(canonical_id = %canonical_id, percolate_hits = hits.len(), "projection rebuilt");
                if !hits.is_empty() {
                    let triggering_robot_ids = leased.payload.get("triggering_robot_ids").cloned().unwrap_or(serde_json::json!([]));
                    let automation_ids: Vec<Uuid> = hits.iter().map(|h| h.automation_id).collect();
                    if let Err(e) = bus
                        .enqueue(NewTask {
                            queue: DISPATCH_QUEUE.to_string(),
                            payload: serde_json::json!({
                                "reference_id": canonical_id,
                                "automation_ids": automation_ids,
                                "triggering_robot_ids": triggering_robot_ids,
                            }),
                            idempotency_key: None,
                            max_attempts: 5,
                        })
                        .await
                    {
                        error!(canonical_id = %canonical_id, error = %e, "failed to enqueue automation dispatch task");
                    }
                }
                let _ = bus.ack(leased.id).await;
            }
            Err(e) => {
                warn!(canonical_id = %canonical_id, error = %e, "projection rebuild failed, nacking for retry");
                let _ = bus.nack(leased.id, &e.to_string()).await;
            }
        }
        processed += 1;
    }
    processed
}
