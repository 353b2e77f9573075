//! Dispatch loop shared by the dedup decision graph and the enhancement
//! request lifecycle: persist → reduce → route → recurse until settled,
//! with every hop chained to its parent via `parent_seq` so a run is
//! fully reconstructable from the `events` table alone.
//!
//! `destiny-dedup` and `destiny-orchestrator` each provide their own
//! `Reducer` (pure state bookkeeping) and `Router` (the I/O that decides
//! what happens next) and get an `Engine` built on top for free. Neither
//! subsystem touches `EventPersister` directly outside of tests — it's
//! `Engine` that calls it, tagging every row with the `actor` the engine
//! was constructed with.

pub mod engine;
pub mod persist;
pub mod traits;

pub use engine::Engine;
pub use persist::MemoryEventSink;
pub use traits::{EventLike, EventPersister, Reducer, Router};
