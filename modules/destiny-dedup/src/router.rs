//! The four-phase pipeline, each phase a `Router` step.
//!
//! Grounded in `rootsignal-scout::pipeline::handlers::dedup`'s layered
//! lookup shape (cheap exact match first, progressively more expensive
//! recall after) and `rootsignal-graph::similarity`'s pairwise-scoring loop,
//! adapted from embedding cosine similarity to the title/author/year/
//! identifier feature set in `crate::features`.

use std::collections::BTreeSet;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use destiny_common::{Determination, EnhancementContent, ExternalIdentifier, Result};
use destiny_engine::Router;
use destiny_events::StoredEvent;
use destiny_store::{NewDecision, RelationalStore, SearchQuery};
use destiny_taskbus::NewTask;
use tracing::warn;
use uuid::Uuid;

use crate::events::{DedupEvent, Outcome, Proposal};
use crate::features::{score_candidate, CandidateVerdict, DedupDoc};
use crate::state::{DedupDeps, DedupState};

pub struct DedupRouter;

#[async_trait]
impl Router<DedupEvent, DedupState, DedupDeps> for DedupRouter {
    async fn route(
        &self,
        event: &DedupEvent,
        _stored: &StoredEvent,
        _state: &mut DedupState,
        deps: &DedupDeps,
    ) -> AnyResult<Vec<DedupEvent>> {
        match event {
            DedupEvent::Requested { reference_id } => Ok(phase1_identifier_shortcut(deps, *reference_id).await?),
            DedupEvent::IdentifierShortcutMissed { reference_id } => {
                Ok(phase2_candidate_recall(deps, *reference_id).await?)
            }
            DedupEvent::CandidatesRecalled { reference_id, candidates } => {
                Ok(phase3_deep_determination(deps, *reference_id, candidates).await?)
            }
            DedupEvent::Proposed { reference_id, proposal } => Ok(phase4_action_resolution(deps, *reference_id, *proposal).await?),
            DedupEvent::Decided { .. } => Ok(vec![]),
        }
    }
}

async fn phase1_identifier_shortcut(deps: &DedupDeps, reference_id: Uuid) -> Result<Vec<DedupEvent>> {
    let trusted = &deps.config.trusted_unique_identifier_types;
    let identifiers = deps.store.list_identifiers(reference_id).await?;
    let trusted_identifiers: Vec<ExternalIdentifier> = identifiers
        .into_iter()
        .filter(|i| trusted.contains(&i.identifier_type.to_string()))
        .collect();

    if trusted_identifiers.is_empty() {
        return Ok(vec![DedupEvent::IdentifierShortcutMissed { reference_id }]);
    }

    let matches = deps.store.find_references_by_identifiers(&trusted_identifiers).await?;
    let others: Vec<_> = matches.into_iter().filter(|(r, _)| r.id != reference_id).collect();
    if others.is_empty() {
        return Ok(vec![DedupEvent::IdentifierShortcutMissed { reference_id }]);
    }

    let mut canonicals: BTreeSet<Uuid> = BTreeSet::new();
    let mut pull_in: Vec<Uuid> = Vec::new();
    let mut blocked = false;

    for (r, decision) in &others {
        match decision {
            None => pull_in.push(r.id),
            Some(d) => match d.determination {
                Determination::Canonical => {
                    canonicals.insert(r.id);
                }
                Determination::Duplicate => {
                    if let Some(c) = d.canonical_reference_id {
                        canonicals.insert(c);
                    }
                }
                Determination::Decoupled | Determination::Unresolved => blocked = true,
                Determination::ExactDuplicate => {}
            },
        }
    }

    if blocked || canonicals.len() >= 2 {
        return Ok(vec![DedupEvent::Proposed { reference_id, proposal: Proposal::Unresolved }]);
    }

    if let Some(&canonical) = canonicals.iter().next() {
        for pulled_in in pull_in {
            if let Err(e) = deps
                .store
                .promote_decision(
                    NewDecision {
                        reference_id: pulled_in,
                        canonical_reference_id: Some(canonical),
                        determination: Determination::Duplicate,
                    },
                    None,
                )
                .await
            {
                warn!(reference_id = %pulled_in, error = %e, "identifier shortcut: failed to pull in matched reference");
            }
        }
        return Ok(vec![DedupEvent::Proposed { reference_id, proposal: Proposal::Duplicate(canonical) }]);
    }

    // Trusted matches exist but none of them carry an active canonical yet —
    // inconclusive, fall through to candidate recall rather than guess.
    Ok(vec![DedupEvent::IdentifierShortcutMissed { reference_id }])
}

async fn phase2_candidate_recall(deps: &DedupDeps, reference_id: Uuid) -> Result<Vec<DedupEvent>> {
    if deps.config.candidate_k == 0 {
        return Ok(vec![DedupEvent::Proposed { reference_id, proposal: Proposal::Canonical }]);
    }

    let doc = project_doc(&deps.store, reference_id).await?;
    if doc.title.is_empty() {
        return Ok(vec![DedupEvent::Proposed { reference_id, proposal: Proposal::Canonical }]);
    }

    let hits = deps
        .search
        .search(&SearchQuery {
            title: doc.title.clone(),
            authors: doc.authors.clone(),
            publication_year: doc.publication_year,
            top_k: deps.config.candidate_k,
        })
        .await?;

    let candidates: Vec<Uuid> = hits.into_iter().map(|h| h.reference_id).filter(|id| *id != reference_id).collect();

    if candidates.is_empty() {
        return Ok(vec![DedupEvent::Proposed { reference_id, proposal: Proposal::Canonical }]);
    }

    Ok(vec![DedupEvent::CandidatesRecalled { reference_id, candidates }])
}

async fn phase3_deep_determination(deps: &DedupDeps, reference_id: Uuid, candidates: &[Uuid]) -> Result<Vec<DedupEvent>> {
    let reference_doc = project_doc(&deps.store, reference_id).await?;

    let mut duplicates: Vec<Uuid> = Vec::new();
    let mut any_unresolved = false;

    for candidate_id in candidates {
        let candidate_doc = project_doc(&deps.store, *candidate_id).await?;
        let verdict = score_candidate(
            &reference_doc,
            &candidate_doc,
            &deps.config.trusted_unique_identifier_types,
            deps.config.title_jaccard_duplicate_threshold,
            deps.config.title_jaccard_unresolved_floor,
            deps.config.shared_identifier_title_jaccard_threshold,
        );
        match verdict {
            CandidateVerdict::Duplicate => duplicates.push(*candidate_id),
            CandidateVerdict::Unresolved => any_unresolved = true,
            CandidateVerdict::Rejected => {}
        }
    }

    // Deterministic, arbitrary tie-break: the star property holds regardless
    // of which duplicate candidate we pick as canonical.
    if let Some(&canonical) = duplicates.iter().min() {
        return Ok(vec![DedupEvent::Proposed { reference_id, proposal: Proposal::Duplicate(canonical) }]);
    }

    if any_unresolved {
        return Ok(vec![DedupEvent::Proposed { reference_id, proposal: Proposal::Unresolved }]);
    }

    Ok(vec![DedupEvent::Proposed { reference_id, proposal: Proposal::Canonical }])
}

enum Action {
    NoOp,
    Promote { canonical_reference_id: Option<Uuid>, determination: Determination },
    Manual,
}

async fn phase4_action_resolution(deps: &DedupDeps, reference_id: Uuid, proposal: Proposal) -> Result<Vec<DedupEvent>> {
    let mut retries = 0u32;

    loop {
        let active = deps.store.get_active_decision(reference_id).await?;
        let action = resolve_action(&deps.store, active.as_ref(), proposal).await?;

        let outcome = match action {
            Action::NoOp => Outcome::NoOp,
            Action::Manual => {
                let expected_version = active.as_ref().map(|d| d.version);
                deps.store
                    .promote_decision(
                        NewDecision { reference_id, canonical_reference_id: None, determination: Determination::Unresolved },
                        expected_version,
                    )
                    .await?;
                Outcome::Manual
            }
            Action::Promote { canonical_reference_id, determination } => {
                let expected_version = active.as_ref().map(|d| d.version);
                match deps
                    .store
                    .promote_decision(NewDecision { reference_id, canonical_reference_id, determination }, expected_version)
                    .await
                {
                    Ok(_) => {
                        enqueue_projection_rebuilds(deps, reference_id, canonical_reference_id, active.as_ref().and_then(|d| d.canonical_reference_id))
                            .await?;
                        Outcome::Promoted { canonical_reference_id, determination }
                    }
                    Err(destiny_common::DestinyError::DecisionStale { .. }) => {
                        retries += 1;
                        if retries >= deps.config.decision_stale_retry_cap {
                            let fresh = deps.store.get_active_decision(reference_id).await.ok().flatten();
                            let _ = deps
                                .store
                                .promote_decision(
                                    NewDecision { reference_id, canonical_reference_id: None, determination: Determination::Unresolved },
                                    fresh.map(|d| d.version),
                                )
                                .await;
                            Outcome::Manual
                        } else {
                            continue;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        return Ok(vec![DedupEvent::Decided { reference_id, outcome }]);
    }
}

async fn resolve_action(store: &RelationalStore, active: Option<&destiny_common::ReferenceDuplicateDecision>, proposal: Proposal) -> Result<Action> {
    let Some(active) = active else {
        return Ok(match proposal {
            Proposal::Canonical => Action::Promote { canonical_reference_id: None, determination: Determination::Canonical },
            Proposal::Duplicate(c) => {
                if is_canonical(store, c).await? {
                    Action::Promote { canonical_reference_id: Some(c), determination: Determination::Duplicate }
                } else {
                    Action::Manual
                }
            }
            Proposal::Unresolved => Action::Promote { canonical_reference_id: None, determination: Determination::Unresolved },
        });
    };

    let matches_active = match (active.determination, proposal) {
        (Determination::Canonical, Proposal::Canonical) => true,
        (Determination::Duplicate, Proposal::Duplicate(c)) => active.canonical_reference_id == Some(c),
        (Determination::Unresolved, Proposal::Unresolved) => true,
        _ => false,
    };
    if matches_active {
        return Ok(Action::NoOp);
    }

    Ok(match (active.determination, proposal) {
        (Determination::Canonical, Proposal::Duplicate(c)) => {
            if is_canonical(store, c).await? {
                Action::Promote { canonical_reference_id: Some(c), determination: Determination::Duplicate }
            } else {
                Action::Manual
            }
        }
        _ => Action::Manual,
    })
}

async fn is_canonical(store: &RelationalStore, reference_id: Uuid) -> Result<bool> {
    Ok(store
        .get_active_decision(reference_id)
        .await?
        .map(|d| d.determination == Determination::Canonical)
        .unwrap_or(false))
}

async fn enqueue_projection_rebuilds(
    deps: &DedupDeps,
    reference_id: Uuid,
    new_canonical: Option<Uuid>,
    old_canonical: Option<Uuid>,
) -> Result<()> {
    let primary = new_canonical.unwrap_or(reference_id);
    enqueue_rebuild(deps, primary).await?;
    if let Some(old) = old_canonical {
        if Some(old) != new_canonical {
            enqueue_rebuild(deps, old).await?;
        }
    }
    Ok(())
}

async fn enqueue_rebuild(deps: &DedupDeps, canonical_reference_id: Uuid) -> Result<()> {
    deps.taskbus
        .enqueue(NewTask {
            queue: "projection_rebuild".to_string(),
            payload: serde_json::json!({ "canonical_reference_id": canonical_reference_id }),
            idempotency_key: Some(format!("projection-rebuild-{canonical_reference_id}")),
            max_attempts: 5,
        })
        .await?;
    Ok(())
}

/// Project a reference into the small `{title, authors, publication_year}`
/// document Phase 2/3 reason about. Takes the latest `Bibliographic`
/// enhancement by insertion order, same "latest wins" rule the persistence
/// gateway applies elsewhere.
async fn project_doc(store: &RelationalStore, reference_id: Uuid) -> Result<DedupDoc> {
    let identifiers = store.list_identifiers(reference_id).await?;
    let enhancements = store.list_enhancements(reference_id).await?;

    let bibliographic = enhancements.iter().rev().find_map(|e| match &e.content {
        EnhancementContent::Bibliographic { title, authors, publication_year, .. } => {
            Some((title.clone(), authors.clone(), *publication_year))
        }
        _ => None,
    });

    let (title, authors, publication_year) = bibliographic.unwrap_or_default();

    Ok(DedupDoc { reference_id, title, authors, publication_year, identifiers })
}
