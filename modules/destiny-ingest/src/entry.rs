//! Parsed shape of one import JSONL line, and the content digest used by
//! the exact-duplicate shortcut.

use destiny_common::{EnhancementContent, IdentifierType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentifierInput {
    pub identifier_type: IdentifierType,
    pub identifier: String,
    pub other_identifier_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnhancementInput {
    pub source: String,
    pub robot_version: Option<String>,
    pub content: EnhancementContent,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportEntry {
    pub identifiers: Vec<IdentifierInput>,
    #[serde(default)]
    pub enhancements: Vec<EnhancementInput>,
    #[serde(default)]
    pub visibility: Option<destiny_common::Visibility>,
}

/// The token set spec.md §4.D step 3 hashes: sorted identifiers, sorted
/// enhancement keys, content digests. A `BTreeSet` gives us the sort for
/// free and lets us compare sets by subset/superset directly.
pub fn entry_digest(identifiers: &[IdentifierInput], enhancements: &[EnhancementInput]) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for ident in identifiers {
        tokens.insert(format!(
            "id:{}:{}:{}",
            ident.identifier_type,
            ident.identifier,
            ident.other_identifier_name.as_deref().unwrap_or("")
        ));
    }
    for enh in enhancements {
        let content_json = serde_json::to_vec(&enh.content).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&content_json);
        let digest = hex_encode(&hasher.finalize());
        tokens.insert(format!("enh:{}:{}:{digest}", enh.source, enh.content.enhancement_type()));
    }
    tokens
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// `existing` subsumes `incoming` when every token the incoming entry
/// would contribute is already present on the existing reference — i.e.
/// the incoming entry adds nothing new.
pub fn is_subsumed_by(incoming: &BTreeSet<String>, existing: &BTreeSet<String>) -> bool {
    incoming.is_subset(existing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(t: IdentifierType, v: &str) -> IdentifierInput {
        IdentifierInput { identifier_type: t, identifier: v.to_string(), other_identifier_name: None }
    }

    #[test]
    fn identical_identifier_sets_produce_identical_digests() {
        let a = entry_digest(&[ident(IdentifierType::Doi, "10.1234/x")], &[]);
        let b = entry_digest(&[ident(IdentifierType::Doi, "10.1234/x")], &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn subset_entry_is_subsumed_by_superset_existing() {
        let incoming = entry_digest(&[ident(IdentifierType::Doi, "10.1234/x")], &[]);
        let existing = entry_digest(
            &[ident(IdentifierType::Doi, "10.1234/x"), ident(IdentifierType::PmId, "555")],
            &[],
        );
        assert!(is_subsumed_by(&incoming, &existing));
    }

    #[test]
    fn entry_with_new_information_is_not_subsumed() {
        let incoming = entry_digest(
            &[ident(IdentifierType::Doi, "10.1234/x"), ident(IdentifierType::PmId, "555")],
            &[],
        );
        let existing = entry_digest(&[ident(IdentifierType::Doi, "10.1234/x")], &[]);
        assert!(!is_subsumed_by(&incoming, &existing));
    }
}
