//! Phase 3 scoring: the default threshold-based determinator.
//!
//! Adapted from `rootsignal-graph::similarity`'s pairwise cosine scoring —
//! same shape (normalize, score a pair, threshold), different features:
//! title token/bigram Jaccard instead of embedding cosine, with year,
//! identifier and author signals folded in rather than a confidence weight.

use destiny_common::{normalize_text, ExternalIdentifier, IdentifierType};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DedupDoc {
    pub reference_id: Uuid,
    pub title: String,
    pub authors: Vec<String>,
    pub publication_year: Option<i32>,
    pub identifiers: Vec<ExternalIdentifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateVerdict {
    Duplicate,
    Unresolved,
    Rejected,
}

const CONFLICT_KEYWORDS: &[&str] = &["reply", "erratum", "comment", "corrigendum"];

fn token_set(s: &str) -> HashSet<String> {
    normalize_text(s).split_whitespace().map(str::to_string).collect()
}

fn bigram_set(s: &str) -> HashSet<String> {
    let normalized = normalize_text(s);
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < 2 {
        return chars.iter().map(|c| c.to_string()).collect();
    }
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

fn jaccard<T: std::hash::Hash + Eq>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Token-set Jaccard and bigram Jaccard over normalized title, averaged into
/// one `title_jaccard` figure — the single score the decision rule reasons
/// about, per spec.
pub fn title_jaccard(a: &str, b: &str) -> f64 {
    let token = jaccard(&token_set(a), &token_set(b));
    let bigram = jaccard(&bigram_set(a), &bigram_set(b));
    (token + bigram) / 2.0
}

fn digit_tokens(s: &str) -> HashSet<String> {
    normalize_text(s)
        .split_whitespace()
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

fn has_conflict_keyword(s: &str) -> bool {
    let lowered = s.to_lowercase();
    CONFLICT_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// "Number tokens disagree, or a reply/erratum/comment keyword shows up in
/// one title only" — the extra signal that pushes a mid-range title score
/// from ambiguous-but-harmless into `UNRESOLVED`.
fn conflicting_signals(a: &str, b: &str) -> bool {
    let digits_a = digit_tokens(a);
    let digits_b = digit_tokens(b);
    let digits_disagree = !digits_a.is_empty() && !digits_b.is_empty() && digits_a != digits_b;
    let keyword_mismatch = has_conflict_keyword(a) != has_conflict_keyword(b);
    digits_disagree || keyword_mismatch
}

/// Bounded so a large collaboration author list can't manufacture a
/// duplicate verdict purely by brute-force overlap count — contribution
/// saturates at `saturation` shared authors.
pub fn author_overlap_score(a: &[String], b: &[String], saturation: usize) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<String> = a.iter().map(|s| normalize_text(s)).collect();
    let set_b: HashSet<String> = b.iter().map(|s| normalize_text(s)).collect();
    let overlap = set_a.intersection(&set_b).count().min(saturation);
    let denom = set_a.len().min(set_b.len()).min(saturation).max(1);
    overlap as f64 / denom as f64
}

fn year_match(a: Option<i32>, b: Option<i32>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if (x - y).abs() <= 1)
}

fn shared_non_trusted_identifier(
    a: &[ExternalIdentifier],
    b: &[ExternalIdentifier],
    trusted_types: &[String],
) -> bool {
    a.iter().any(|ia| {
        !trusted_types.contains(&ia.identifier_type.to_string())
            && b.iter().any(|ib| {
                ib.identifier_type == ia.identifier_type
                    && ib.identifier == ia.identifier
                    && ib.other_identifier_name == ia.other_identifier_name
            })
    })
}

/// Length-ratio sanity: two titles of wildly different length are unlikely
/// to be the same work even if their Jaccard score is inflated by a few
/// shared common words.
fn length_ratio_ok(a: &str, b: &str) -> bool {
    let (la, lb) = (a.chars().count().max(1), b.chars().count().max(1));
    let (shorter, longer) = if la < lb { (la, lb) } else { (lb, la) };
    shorter as f64 / longer as f64 >= 0.3
}

/// Phase 3 per-candidate determinator: `DUPLICATE` if (`title_jaccard >= 0.5`
/// and `year_match`) or (shared non-trusted identifier and `title_jaccard >=
/// 0.3`); `UNRESOLVED` if `0.3 <= title_jaccard < 0.5` with a conflicting
/// signal; otherwise `Rejected`.
pub fn score_candidate(
    reference: &DedupDoc,
    candidate: &DedupDoc,
    trusted_types: &[String],
    duplicate_threshold: f64,
    unresolved_floor: f64,
    shared_identifier_threshold: f64,
) -> CandidateVerdict {
    if !length_ratio_ok(&reference.title, &candidate.title) {
        return CandidateVerdict::Rejected;
    }

    let tj = title_jaccard(&reference.title, &candidate.title);
    let years_match = year_match(reference.publication_year, candidate.publication_year);
    let shared_id = shared_non_trusted_identifier(&reference.identifiers, &candidate.identifiers, trusted_types);

    if (tj >= duplicate_threshold && years_match) || (shared_id && tj >= shared_identifier_threshold) {
        return CandidateVerdict::Duplicate;
    }

    if tj >= unresolved_floor && tj < duplicate_threshold && conflicting_signals(&reference.title, &candidate.title) {
        return CandidateVerdict::Unresolved;
    }

    CandidateVerdict::Rejected
}

/// Non-gating diagnostic feature — computed for observability/audit, not
/// part of the default decision rule (the rule as specified reasons only
/// about title Jaccard, year and identifier overlap).
pub fn diagnostic_author_overlap(reference: &DedupDoc, candidate: &DedupDoc, saturation: usize) -> f64 {
    author_overlap_score(&reference.authors, &candidate.authors, saturation)
}

pub fn trusted_identifier_types(identifiers: &[ExternalIdentifier], trusted: &[String]) -> Vec<ExternalIdentifier> {
    identifiers
        .iter()
        .filter(|i| trusted.contains(&i.identifier_type.to_string()))
        .cloned()
        .collect()
}

pub fn is_trusted(identifier_type: IdentifierType, trusted: &[String]) -> bool {
    trusted.contains(&identifier_type.to_string())
}
