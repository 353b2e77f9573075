//! Deduplication Engine: `decide(reference_id)` runs the four phases
//! (identifier shortcut, candidate recall, deep determination, action
//! resolution) on `destiny-engine`'s dispatch loop — each phase a `Router`
//! step that either emits the next phase's event or short-circuits straight
//! to action resolution.

pub mod events;
pub mod features;
pub mod reducer;
pub mod router;
pub mod state;
pub mod worker;

pub use events::{DedupEvent, Outcome, Proposal};
pub use reducer::DedupReducer;
pub use router::DedupRouter;
pub use state::{DedupDeps, DedupState};

use destiny_common::{DestinyError, Result};
use destiny_engine::{Engine, EventPersister};
use uuid::Uuid;

pub struct DedupEngine<P: EventPersister> {
    engine: Engine<DedupEvent, DedupState, DedupDeps, DedupReducer, DedupRouter, P>,
    deps: DedupDeps,
}

impl<P: EventPersister> DedupEngine<P> {
    pub fn new(persister: P, deps: DedupDeps, run_id: String) -> Self {
        Self { engine: Engine::new(DedupReducer, DedupRouter, persister, run_id, "dedup"), deps }
    }

    /// Runs `decide(reference_id)` to completion and returns the final
    /// bookkeeping state — `state.outcome` is `None` only if the dispatch
    /// loop itself failed before Phase 4 ran.
    pub async fn decide(&self, reference_id: Uuid) -> Result<DedupState> {
        let mut state = DedupState::default();
        self.engine
            .dispatch(DedupEvent::Requested { reference_id }, &mut state, &self.deps)
            .await
            .map_err(DestinyError::Anyhow)?;
        Ok(state)
    }
}
