//! Lightweight task bus telemetry. Not a scrape counter like the teacher's
//! `scheduling::metrics` stage — the bus has no batches to summarize, only a
//! running count of active leases and dead-lettered tasks — so this just
//! wraps the `tracing` events a dashboard scrapes for those two numbers.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskBusMetrics;

impl TaskBusMetrics {
    pub fn record_enqueue(&self, queue: &str) {
        info!(queue, "task enqueued");
    }

    pub fn record_lease(&self, queue: &str, active_leases: i64) {
        info!(queue, active_leases, "task leased");
    }

    pub fn record_ack(&self, queue: &str) {
        info!(queue, "task acked");
    }

    pub fn record_nack(&self, queue: &str, attempts: i32) {
        warn!(queue, attempts, "task nacked, will retry");
    }

    pub fn record_dlq(&self, queue: &str, dlq_depth: i64) {
        warn!(queue, dlq_depth, "task moved to DLQ");
    }
}
