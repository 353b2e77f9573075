//! Mutable state threaded through one `decide()` dispatch, and the
//! dependencies its router needs to do I/O.

use destiny_common::DedupConfig;
use destiny_store::RelationalStore;
use destiny_taskbus::TaskBus;

use crate::events::{Outcome, Proposal};

/// Pure bookkeeping, updated by the reducer as phases settle. Lets a caller
/// (or a test) read back what happened without threading the result through
/// `Engine::dispatch`'s `()` return.
#[derive(Debug, Clone, Default)]
pub struct DedupState {
    pub proposal: Option<Proposal>,
    pub outcome: Option<Outcome>,
}

pub struct DedupDeps {
    pub store: RelationalStore,
    pub search: destiny_store::SearchIndex,
    pub taskbus: TaskBus,
    pub config: DedupConfig,
}
