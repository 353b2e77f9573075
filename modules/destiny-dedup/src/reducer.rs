//! Pure state updates — no I/O, mirrors the ingestion pipeline's own
//! discipline of keeping bookkeeping separate from the I/O-doing router.

use destiny_engine::Reducer;

use crate::events::DedupEvent;
use crate::state::DedupState;

pub struct DedupReducer;

impl Reducer<DedupEvent, DedupState> for DedupReducer {
    fn reduce(&self, state: &mut DedupState, event: &DedupEvent) {
        match event {
            DedupEvent::Proposed { proposal, .. } => {
                state.proposal = Some(*proposal);
            }
            DedupEvent::Decided { outcome, .. } => {
                state.outcome = Some(outcome.clone());
            }
            DedupEvent::Requested { .. } | DedupEvent::IdentifierShortcutMissed { .. } | DedupEvent::CandidatesRecalled { .. } => {}
        }
    }
}
