//! Folds a canonical reference and its duplicates into one
//! `DeduplicatedReferenceProjection`, writes it to the search index, and
//! percolates the delta against stored automation queries.
//!
//! Grounded on the teacher's `GraphProjector`: a pure fold over stored facts
//! into a single derived view, with idempotent writes keyed on a stable id.
//! Unlike the graph projector (one event in, one mutation out) this folds
//! the *entire* current state of a canonical's member set on every rebuild,
//! since the projection is a derived read model, not an event log.

use std::collections::BTreeMap;

use destiny_common::{
    Changeset, DeduplicatedReferenceProjection, DestinyError, Enhancement, ExternalIdentifier,
    PercolationDocument, ProjectedEnhancement, ProjectedIdentifier, Result,
};
use destiny_store::{PercolateHit, RelationalStore, SearchIndex};
use uuid::Uuid;

#[derive(Clone)]
pub struct ProjectionBuilder {
    store: RelationalStore,
    search: SearchIndex,
}

impl ProjectionBuilder {
    pub fn new(store: RelationalStore, search: SearchIndex) -> Self {
        Self { store, search }
    }

    /// Rebuilds and re-indexes the projection for `canonical_id`, percolates
    /// the resulting changeset, and returns the `(robot_id, reference_id)`
    /// hits for the caller to hand to the automation dispatcher.
    pub async fn rebuild(&self, canonical_id: Uuid) -> Result<Vec<PercolateHit>> {
        let Some(_canonical) = self.store.get_reference(canonical_id).await? else {
            return Err(DestinyError::DecisionGraphCorruption(format!(
                "rebuild requested for unknown reference {canonical_id}"
            )));
        };

        let mut member_ids: Vec<Uuid> = self
            .store
            .find_duplicates_of(canonical_id)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();
        member_ids.push(canonical_id);
        member_ids.sort();
        member_ids.dedup();

        let mut identifiers: Vec<ProjectedIdentifier> = Vec::new();
        let mut enhancements_by_reference: Vec<Vec<Enhancement>> = Vec::with_capacity(member_ids.len());
        for &member_id in &member_ids {
            let member_identifiers = self.store.list_identifiers(member_id).await?;
            identifiers.extend(member_identifiers.into_iter().map(project_identifier));
            enhancements_by_reference.push(self.store.list_enhancements(member_id).await?);
        }
        dedup_identifiers(&mut identifiers);

        let enhancements = fold_enhancements(enhancements_by_reference.into_iter().flatten());

        let projection = DeduplicatedReferenceProjection {
            canonical_id,
            member_reference_ids: member_ids,
            identifiers,
            enhancements,
        };

        let previous = self.search.get(canonical_id).await?;
        let changeset = build_changeset(canonical_id, &projection, previous.as_ref());

        let doc = PercolationDocument { reference: projection, changeset };
        self.search.index(canonical_id, &doc).await?;
        self.search.percolate(&doc).await
    }
}

fn project_identifier(i: ExternalIdentifier) -> ProjectedIdentifier {
    ProjectedIdentifier {
        reference_id: i.reference_id,
        identifier_type: i.identifier_type,
        identifier: i.identifier,
        other_identifier_name: i.other_identifier_name,
    }
}

/// Dedups on the full tuple (reference ids are globally exclusive owners of
/// an identifier value, so in practice this only collapses exact repeats),
/// then sorts on the full tuple so rebuilding twice yields byte-identical
/// output (spec's idempotence requirement).
fn dedup_identifiers(identifiers: &mut Vec<ProjectedIdentifier>) {
    identifiers.sort_by(|a, b| {
        (a.identifier_type.to_string(), &a.identifier, &a.other_identifier_name).cmp(&(
            b.identifier_type.to_string(),
            &b.identifier,
            &b.other_identifier_name,
        ))
    });
    identifiers.dedup_by(|a, b| {
        a.identifier_type == b.identifier_type && a.identifier == b.identifier && a.other_identifier_name == b.other_identifier_name
    });
}

/// Within each `(reference_id, source, enhancement_type)` key, keeps only
/// the latest by `created_at` (this store's append-only enhancements have
/// no separate `updated_at`, so insertion order stands in for it) — then
/// sorts the result on the key tuple for idempotent ordering.
fn fold_enhancements(all: impl Iterator<Item = Enhancement>) -> Vec<ProjectedEnhancement> {
    let mut latest: BTreeMap<(Uuid, String, &'static str), Enhancement> = BTreeMap::new();
    for e in all {
        let key = (e.reference_id, e.source.clone(), e.enhancement_type());
        match latest.get(&key) {
            Some(existing) if existing.created_at >= e.created_at => {}
            _ => {
                latest.insert(key, e);
            }
        }
    }
    latest
        .into_values()
        .map(|e| ProjectedEnhancement { reference_id: e.reference_id, source: e.source, content: e.content })
        .collect()
}

/// The delta that triggered this rebuild: identifiers/enhancements present
/// in the new projection but absent from the previously indexed document.
/// With no prior document (first build), everything is new.
fn build_changeset(
    canonical_id: Uuid,
    projection: &DeduplicatedReferenceProjection,
    previous: Option<&serde_json::Value>,
) -> Changeset {
    let prev_reference = previous
        .and_then(|v| v.get("reference"))
        .and_then(|v| serde_json::from_value::<DeduplicatedReferenceProjection>(v.clone()).ok());

    let added_identifiers = match &prev_reference {
        Some(prev) => projection
            .identifiers
            .iter()
            .filter(|i| {
                !prev.identifiers.iter().any(|p| {
                    p.identifier_type == i.identifier_type && p.identifier == i.identifier && p.other_identifier_name == i.other_identifier_name
                })
            })
            .cloned()
            .collect(),
        None => projection.identifiers.clone(),
    };

    let added_enhancements = match &prev_reference {
        Some(prev) => projection
            .enhancements
            .iter()
            .filter(|e| {
                !prev
                    .enhancements
                    .iter()
                    .any(|p| p.reference_id == e.reference_id && p.source == e.source && p.content.enhancement_type() == e.content.enhancement_type())
            })
            .cloned()
            .collect(),
        None => projection.enhancements.clone(),
    };

    Changeset { reference_id: canonical_id, added_identifiers, added_enhancements }
}
