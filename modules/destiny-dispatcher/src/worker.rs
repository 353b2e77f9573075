//! Consumes `enhancement_dispatch` tasks (one per projection rebuild that
//! matched at least one automation) into the in-process window, and turns
//! the window into enhancement requests on its own cadence.
//!
//! Grounded on the task bus's competing-consumers contract the same way
//! `destiny-projection::worker` is, but the unit of work here isn't
//! idempotent per task — aggregation is deliberately stateful across leases,
//! so a dispatcher restart loses whatever hadn't been flushed yet. That's an
//! accepted gap (spec §4.H's window is a batching optimization, not a
//! durability guarantee): a missed automation firing is caught on the next
//! change to the same reference, not retried on its own.

use std::sync::Mutex;

use chrono::{Duration, Utc};
use destiny_common::{DestinyError, EnhancementRequest, EnhancementRequestStatus, Result};
use destiny_store::RelationalStore;
use destiny_taskbus::TaskBus;
use tracing::{error, warn};
use uuid::Uuid;

use crate::aggregate::Window;

pub const QUEUE: &str = "enhancement_dispatch";

pub struct Dispatcher {
    store: RelationalStore,
    taskbus: TaskBus,
    window: Mutex<Window>,
}

impl Dispatcher {
    pub fn new(store: RelationalStore, taskbus: TaskBus) -> Self {
        Self { store, taskbus, window: Mutex::new(Window::default()) }
    }

    /// Leases and folds up to `max` dispatch tasks into the window. Returns
    /// the number processed — `0` means the queue was empty.
    pub async fn ingest_once(&self, lease_for: Duration, max: usize) -> usize {
        let mut processed = 0;
        for _ in 0..max {
            let leased = match self.taskbus.lease(QUEUE, lease_for, "dispatcher").await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "dispatcher worker: lease failed");
                    break;
                }
            };

            if let Err(e) = self.fold(&leased.payload).await {
                warn!(task_id = %leased.id, error = %e, "dispatcher worker: failed to fold hit, acking anyway");
            }
            let _ = self.taskbus.ack(leased.id).await;
            processed += 1;
        }
        processed
    }

    async fn fold(&self, payload: &serde_json::Value) -> Result<()> {
        let reference_id = payload
            .get("reference_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| DestinyError::ParseError("dispatch task missing reference_id".to_string()))?;

        let automation_ids: Vec<Uuid> = payload
            .get("automation_ids")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()).collect())
            .unwrap_or_default();

        let triggering_robot_ids: Vec<Uuid> = payload
            .get("triggering_robot_ids")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).filter_map(|s| Uuid::parse_str(s).ok()).collect())
            .unwrap_or_default();

        for automation_id in automation_ids {
            let automation = match self.store.get_automation(automation_id).await? {
                Some(automation) => automation,
                // The automation was removed between percolation and dispatch.
                None => continue,
            };

            if triggering_robot_ids.contains(&automation.robot_id) {
                continue;
            }

            let originating = match triggering_robot_ids.as_slice() {
                [single] => Some(*single),
                _ => None,
            };

            let mut window = self.window.lock().expect("window mutex poisoned");
            window.add(automation.robot_id, reference_id, originating);
        }
        Ok(())
    }

    /// Drains the window and turns each robot's bucket into a new
    /// enhancement request. Returns the number of requests created.
    pub async fn flush(&self) -> Result<usize> {
        let pending = {
            let mut window = self.window.lock().expect("window mutex poisoned");
            window.drain()
        };

        for p in &pending {
            let now = Utc::now();
            let request = EnhancementRequest {
                id: Uuid::new_v4(),
                robot_id: p.robot_id,
                status: EnhancementRequestStatus::Received,
                reference_ids: p.reference_ids.clone(),
                originating_robot_id: p.originating_robot_id,
                created_at: now,
                updated_at: now,
            };
            self.store.create_enhancement_request(&request).await?;
        }
        Ok(pending.len())
    }

    pub fn window_is_empty(&self) -> bool {
        self.window.lock().expect("window mutex poisoned").is_empty()
    }
}
