use destiny_engine::Reducer;

use crate::events::OrchestratorEvent;
use crate::state::OrchestratorState;

pub struct OrchestratorReducer;

impl Reducer<OrchestratorEvent, OrchestratorState> for OrchestratorReducer {
    fn reduce(&self, state: &mut OrchestratorState, event: &OrchestratorEvent) {
        if let OrchestratorEvent::Settled { outcome, .. } = event {
            state.outcome = Some(*outcome);
        }
    }
}
