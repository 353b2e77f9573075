//! Core types for the causal fact store backing both of DESTINY's
//! lifecycles (dedup decisions and enhancement-request orchestration).
//! This crate knows nothing about references, robots, or identifiers —
//! it only knows that rows form causal chains (`parent_seq`) and belong
//! to a `run_id` and an `actor` (which subsystem wrote them).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row as read back from the `events` table.
///
/// `run_id` scopes a row to one `decide(reference_id)` call or one
/// enhancement-request lifecycle; `actor` records which subsystem wrote
/// it (`"dedup"` or `"orchestrator"` in production — see
/// `destiny_engine::Engine::new`) so a row can be attributed without
/// parsing `event_type`. `caused_by_seq` and `parent_seq` are currently
/// always equal in practice — `destiny_engine::Engine::dispatch` never
/// distinguishes the event that triggered a child from the event it is
/// chained under — but the store keeps them as separate columns in case
/// a future router needs to record "triggered by X, but logically
/// chained under Y" (e.g. a dedup retry re-chaining off the original
/// phase-1 event rather than the stale phase it's retrying).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub parent_seq: Option<i64>,
    pub caused_by_seq: Option<i64>,
    pub run_id: Option<String>,
    pub actor: Option<String>,
    pub payload: serde_json::Value,
    pub schema_v: i16,
}

/// A row being written. The caller assembles this; `EventStore` assigns
/// `seq`/`ts` on append.
#[derive(Debug, Clone)]
pub struct AppendEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub run_id: Option<String>,
    pub actor: Option<String>,
    pub schema_v: i16,
}

impl AppendEvent {
    /// `event_type` is whatever the calling subsystem's `EventLike::
    /// event_type_str` returned (`"dedup_requested"`,
    /// `"orchestrator_batch_allocated"`, ...) — this crate doesn't
    /// interpret it, only indexes on it for `read_by_type`.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            run_id: None,
            actor: None,
            schema_v: 1,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Subsystem name. `destiny_engine::Engine` calls this on every
    /// append so a bare `events` row is attributable without decoding
    /// `payload`.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Bumped when a subsystem's payload shape changes incompatibly —
    /// a reducer replaying old rows checks this before trusting a field
    /// that was added after `schema_v` 1.
    pub fn with_schema_v(mut self, v: i16) -> Self {
        self.schema_v = v;
        self
    }
}
