//! Enhancement Orchestrator: owns the enhancement request lifecycle (spec
//! §4.G) — pulling batches for robots, validating their results and
//! deciding when a request is finally done. Mirrors the Dedup Engine's
//! split between a `destiny-engine` dispatch loop for the handful of
//! transitions that genuinely depend on more than one caller's say-so
//! (`router`) and plain async functions for everything else (`batch`).

pub mod batch;
pub mod events;
pub mod hmac_auth;
pub mod http;
pub mod reducer;
pub mod router;
pub mod state;
pub mod worker;

pub use events::{OrchestratorEvent, RequestOutcome};
pub use reducer::OrchestratorReducer;
pub use router::OrchestratorRouter;
pub use state::{OrchestratorDeps, OrchestratorState};

use destiny_common::{DestinyError, Result};
use destiny_engine::{Engine, EventPersister};

pub struct OrchestratorEngine<P: EventPersister> {
    engine: Engine<OrchestratorEvent, OrchestratorState, OrchestratorDeps, OrchestratorReducer, OrchestratorRouter, P>,
    deps: OrchestratorDeps,
}

impl<P: EventPersister> OrchestratorEngine<P> {
    pub fn new(persister: P, deps: OrchestratorDeps, run_id: String) -> Self {
        Self { engine: Engine::new(OrchestratorReducer, OrchestratorRouter, persister, run_id, "orchestrator"), deps }
    }

    pub fn deps(&self) -> &OrchestratorDeps {
        &self.deps
    }

    /// Dispatches one lifecycle event to completion and returns the
    /// resulting state. `batch.rs` calls this after it has already done the
    /// I/O a transition implies (allocation, validation) — the event is
    /// the terminal fact of work already performed, not a request to
    /// perform it.
    pub async fn apply(&self, event: OrchestratorEvent) -> Result<OrchestratorState> {
        let mut state = OrchestratorState::default();
        self.engine
            .dispatch(event, &mut state, &self.deps)
            .await
            .map_err(DestinyError::Anyhow)?;
        Ok(state)
    }
}
