//! Task Bus: a Postgres-backed competing-consumers queue.
//!
//! `FOR UPDATE SKIP LOCKED` leases give at-least-once delivery without a
//! broker. Enqueue/ack/nack facts are also logged to `destiny-events`'s
//! append-only table so the queue's own history is auditable the same way
//! duplicate decisions are — grounded in `rootsignal-events::EventStore`
//! being the durable log of record for every subsystem in this workspace.

pub mod metrics;

pub use metrics::TaskBusMetrics;

use chrono::{Duration as ChronoDuration, Utc};
use destiny_common::{DestinyError, Result};
use destiny_events::{AppendEvent, EventStore};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub queue: String,
    pub payload: serde_json::Value,
    /// Idempotency key for the handler's keyed operation (spec §4.C:
    /// `import_batch_id` | `reference_id+decision_epoch` | `request_id+batch_id`).
    pub idempotency_key: Option<String>,
    pub max_attempts: i32,
}

#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
}

#[derive(Clone)]
pub struct TaskBus {
    pool: PgPool,
    events: Option<EventStore>,
    metrics: TaskBusMetrics,
}

impl TaskBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, events: None, metrics: TaskBusMetrics }
    }

    /// Attach an event store so enqueue/ack/nack facts are audited.
    pub fn with_event_log(mut self, events: EventStore) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Enqueues a task. Idempotent on `(queue, idempotency_key)` while a
    /// prior instance of that key is still pending or leased — the caller
    /// gets the existing task's id back rather than a duplicate.
    pub async fn enqueue(&self, task: NewTask) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO tasks (id, queue, payload, idempotency_key, max_attempts)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (queue, idempotency_key) WHERE idempotency_key IS NOT NULL
                AND status IN ('pending', 'leased')
            DO UPDATE SET queue = tasks.queue
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&task.queue)
        .bind(&task.payload)
        .bind(&task.idempotency_key)
        .bind(task.max_attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        let returned_id: Uuid = row
            .try_get("id")
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        self.metrics.record_enqueue(&task.queue);
        self.log(AppendEvent::new(
            "task_enqueued",
            serde_json::json!({ "task_id": returned_id, "queue": task.queue }),
        ))
        .await;

        Ok(returned_id)
    }

    /// Claims up to one pending task from `queue`, locking it with
    /// `FOR UPDATE SKIP LOCKED` so competing workers never double-claim.
    pub async fn lease(&self, queue: &str, lease_for: ChronoDuration, worker_id: &str) -> Result<Option<LeasedTask>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        let row = sqlx::query(
            r#"
            SELECT id, queue, payload, attempts, max_attempts
            FROM tasks
            WHERE queue = $1 AND status = 'pending' AND available_at <= now()
            ORDER BY available_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(queue)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        let Some(row) = row else {
            tx.commit().await.map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;
            return Ok(None);
        };

        let leased = task_from_row(&row)?;
        let lease_until = Utc::now() + lease_for;

        sqlx::query(
            "UPDATE tasks SET status = 'leased', lease_until = $1, leased_by = $2, updated_at = now() WHERE id = $3",
        )
        .bind(lease_until)
        .bind(worker_id)
        .bind(leased.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        tx.commit().await.map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        let active = self.count_leased(queue).await.unwrap_or(0);
        self.metrics.record_lease(queue, active);

        Ok(Some(leased))
    }

    /// Long tasks call this periodically to hold the lease past its initial
    /// TTL. A no-op if the worker already lost the lease (expired and
    /// reclaimed by someone else) — returns `TaskBusUnavailable` so the
    /// caller treats its work as cancelled.
    pub async fn renew_lease(&self, task_id: Uuid, worker_id: &str, extend_by: ChronoDuration) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET lease_until = lease_until + $1, updated_at = now() \
             WHERE id = $2 AND status = 'leased' AND leased_by = $3",
        )
        .bind(extend_by)
        .bind(task_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(DestinyError::TaskBusUnavailable(format!(
                "lease on task {task_id} was lost before renewal"
            )));
        }
        Ok(())
    }

    pub async fn ack(&self, task_id: Uuid) -> Result<()> {
        let row = sqlx::query("UPDATE tasks SET status = 'done', updated_at = now() WHERE id = $1 RETURNING queue")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        if let Some(row) = row {
            let queue: String = row.try_get("queue").unwrap_or_default();
            self.metrics.record_ack(&queue);
            self.log(AppendEvent::new("task_acked", serde_json::json!({ "task_id": task_id }))).await;
        }
        Ok(())
    }

    /// Failure path. Below `max_attempts`, the task returns to `pending`
    /// after a capped exponential backoff; at the cap it moves to the DLQ.
    pub async fn nack(&self, task_id: Uuid, reason: &str) -> Result<()> {
        let row = sqlx::query("SELECT queue, attempts, max_attempts FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        let Some(row) = row else {
            return Ok(());
        };
        let queue: String = row.try_get("queue").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;
        let attempts: i32 = row.try_get("attempts").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;
        let max_attempts: i32 =
            row.try_get("max_attempts").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        let next_attempts = attempts + 1;

        if next_attempts >= max_attempts {
            sqlx::query(
                "UPDATE tasks SET status = 'dlq', attempts = $1, last_error = $2, updated_at = now() WHERE id = $3",
            )
            .bind(next_attempts)
            .bind(reason)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

            let depth = self.count_dlq(&queue).await.unwrap_or(0);
            self.metrics.record_dlq(&queue, depth);
            self.log(AppendEvent::new(
                "task_dead_lettered",
                serde_json::json!({ "task_id": task_id, "reason": reason }),
            ))
            .await;
        } else {
            let delay = backoff_delay(next_attempts);
            sqlx::query(
                "UPDATE tasks SET status = 'pending', attempts = $1, last_error = $2, \
                 available_at = now() + $3, lease_until = NULL, leased_by = NULL, updated_at = now() \
                 WHERE id = $4",
            )
            .bind(next_attempts)
            .bind(reason)
            .bind(delay)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

            self.metrics.record_nack(&queue, next_attempts);
        }
        Ok(())
    }

    /// Redelivers tasks whose lease expired without an ack/nack (a crashed
    /// worker). Run periodically by a reaper task.
    pub async fn reclaim_expired_leases(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', lease_until = NULL, leased_by = NULL, updated_at = now() \
             WHERE status = 'leased' AND lease_until < now()",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;

        let n = result.rows_affected();
        if n > 0 {
            warn!(reclaimed = n, "reclaimed expired task leases");
        }
        Ok(n)
    }

    /// Reads back a task's current status (`pending`/`leased`/`done`/`dlq`),
    /// for callers that need to know whether a fire-and-forget task they
    /// enqueued earlier has actually finished (e.g. the orchestrator
    /// polling whether a rebuild it kicked off has settled).
    pub async fn task_status(&self, task_id: Uuid) -> Result<Option<String>> {
        let row = sqlx::query("SELECT status FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;
        row.map(|r| r.try_get("status").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string())))
            .transpose()
    }

    pub async fn count_leased(&self, queue: &str) -> Result<i64> {
        let row = sqlx::query("SELECT count(*) AS c FROM tasks WHERE queue = $1 AND status = 'leased'")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;
        row.try_get::<i64, _>("c").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))
    }

    pub async fn count_dlq(&self, queue: &str) -> Result<i64> {
        let row = sqlx::query("SELECT count(*) AS c FROM tasks WHERE queue = $1 AND status = 'dlq'")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?;
        row.try_get::<i64, _>("c").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))
    }

    async fn log(&self, event: AppendEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.append(event).await {
                warn!(error = %e, "task bus audit log append failed (non-fatal)");
            }
        }
    }
}

/// Exponential backoff capped at 1 hour: 2^attempts seconds, attempt 1 is 2s.
fn backoff_delay(attempts: i32) -> ChronoDuration {
    let secs = 2i64.saturating_pow(attempts.max(1) as u32).min(3600);
    ChronoDuration::seconds(secs)
}

fn task_from_row(row: &PgRow) -> Result<LeasedTask> {
    Ok(LeasedTask {
        id: row.try_get("id").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?,
        queue: row.try_get("queue").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?,
        payload: row.try_get("payload").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?,
        attempts: row.try_get("attempts").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?,
        max_attempts: row.try_get("max_attempts").map_err(|e| DestinyError::TaskBusUnavailable(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), ChronoDuration::seconds(2));
        assert_eq!(backoff_delay(2), ChronoDuration::seconds(4));
        assert_eq!(backoff_delay(10), ChronoDuration::seconds(1024));
        assert_eq!(backoff_delay(20), ChronoDuration::seconds(3600));
    }
}
