//! Traits a subsystem implements to run its lifecycle on top of the
//! dispatch loop in `engine.rs`. DESTINY has exactly two: the dedup
//! decision graph (`DedupEvent`/`DedupState`/`DedupDeps`, phases 1-4) and
//! the enhancement request lifecycle (`OrchestratorEvent`/
//! `OrchestratorState`/`OrchestratorDeps`). Both settle in a handful of
//! hops, which is what `Engine`'s causal-chain guard assumes.

use anyhow::Result;
use async_trait::async_trait;
use destiny_events::StoredEvent;

/// Events carry a type string and know how to serialize for the event store.
pub trait EventLike: Clone + Send + Sync + 'static {
    /// The event type string stored in the `event_type` column — DESTINY
    /// namespaces these per subsystem (`dedup_requested`,
    /// `orchestrator_batch_allocated`) so `EventStore::read_by_type` and a
    /// human scanning `run_id`-scoped history can tell the two lifecycles
    /// apart without a schema lookup.
    fn event_type_str(&self) -> String;

    /// Serialize this event to the JSON payload stored in the event store.
    ///
    /// `DedupEvent` and `OrchestratorEvent` both implement this as a plain
    /// `serde_json::to_value(self)` over the whole enum — the variant name
    /// and its fields land in `payload` as-is, rather than being unwrapped
    /// into a separate envelope type first.
    fn to_persist_payload(&self) -> serde_json::Value;
}

/// Pure state updates. No I/O, no side effects.
///
/// Called for every event before routing. `DedupReducer` uses this to track
/// which phase last ran and the final `Outcome`; `OrchestratorReducer` uses
/// it to track the request's `RequestOutcome`. Neither reducer touches the
/// store — that bookkeeping has to be derivable from the event alone, the
/// same guarantee an external reader replaying `destiny_events::EventStore`
/// gets.
pub trait Reducer<E: EventLike, S: Send>: Send + Sync {
    fn reduce(&self, state: &mut S, event: &E);
}

/// Routes events to handlers. May perform I/O, emit new events.
///
/// Receives the persisted `StoredEvent` (for projection or other uses).
/// Returns zero or more child events that re-enter the dispatch loop —
/// `DedupRouter` uses this to advance from one phase to the next;
/// `OrchestratorRouter` uses it to react to a batch settling. A phase that
/// resolves with no further action (e.g. an outright `DUPLICATE`) simply
/// returns an empty vec and the chain ends there.
#[async_trait]
pub trait Router<E: EventLike, S: Send, D: Send + Sync>: Send + Sync {
    async fn route(
        &self,
        event: &E,
        stored: &StoredEvent,
        state: &mut S,
        deps: &D,
    ) -> Result<Vec<E>>;
}

/// Persists events and returns a StoredEvent with sequence numbers.
///
/// Implemented by EventStore (postgres) and MemoryEventSink (tests).
/// Also implemented for `Arc<P>` so the sink can be shared for assertions.
#[async_trait]
pub trait EventPersister: Send + Sync {
    /// Persist a root event (no parent). `actor` is the subsystem name
    /// (`"dedup"`, `"orchestrator"`) the calling `Engine` was built with —
    /// stored in the `actor` column so a row in the shared `events` table
    /// can be attributed to a lifecycle without parsing `event_type`.
    async fn persist(
        &self,
        event_type: String,
        payload: serde_json::Value,
        run_id: &str,
        actor: &str,
    ) -> Result<StoredEvent>;

    /// Persist a child event (causal chain from parent_seq).
    async fn persist_child(
        &self,
        parent_seq: i64,
        event_type: String,
        payload: serde_json::Value,
        run_id: &str,
        actor: &str,
    ) -> Result<StoredEvent>;
}
