//! Event vocabulary for one `decide(reference_id)` run.
//!
//! Each phase either short-circuits straight to `Proposed` (a determined
//! proposal ready for action resolution) or emits the event that starts the
//! next phase. Mirrors the teacher's pipeline events: a flat enum with one
//! variant per transition, serialized as-is into the event store.

use destiny_common::Determination;
use destiny_engine::EventLike;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proposal {
    Canonical,
    Duplicate(Uuid),
    Unresolved,
}

/// Terminal fact for a `decide()` run — what Phase 4 actually did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Promoted { canonical_reference_id: Option<Uuid>, determination: Determination },
    NoOp,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DedupEvent {
    /// Starts the run. Triggers Phase 1 — Identifier Shortcut.
    Requested { reference_id: Uuid },
    /// Phase 1 found no trusted-identifier matches (or an inconclusive set
    /// with no active canonical among them). Triggers Phase 2.
    IdentifierShortcutMissed { reference_id: Uuid },
    /// Phase 2 returned a non-empty candidate set. Triggers Phase 3.
    CandidatesRecalled { reference_id: Uuid, candidates: Vec<Uuid> },
    /// Any phase settled on a proposal. Triggers Phase 4 — Action Resolution.
    Proposed { reference_id: Uuid, proposal: Proposal },
    /// Phase 4 settled. Terminal — the reducer records it, the router
    /// emits no further children.
    Decided { reference_id: Uuid, outcome: Outcome },
}

impl DedupEvent {
    pub fn reference_id(&self) -> Uuid {
        match self {
            DedupEvent::Requested { reference_id }
            | DedupEvent::IdentifierShortcutMissed { reference_id }
            | DedupEvent::CandidatesRecalled { reference_id, .. }
            | DedupEvent::Proposed { reference_id, .. }
            | DedupEvent::Decided { reference_id, .. } => *reference_id,
        }
    }
}

impl EventLike for DedupEvent {
    fn event_type_str(&self) -> String {
        match self {
            DedupEvent::Requested { .. } => "dedup_requested",
            DedupEvent::IdentifierShortcutMissed { .. } => "dedup_identifier_shortcut_missed",
            DedupEvent::CandidatesRecalled { .. } => "dedup_candidates_recalled",
            DedupEvent::Proposed { .. } => "dedup_proposed",
            DedupEvent::Decided { .. } => "dedup_decided",
        }
        .to_string()
    }

    fn to_persist_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
