pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DedupConfig};
pub use error::{DestinyError, Result};
pub use types::*;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash `(sorted identifiers, sorted enhancement keys, content digests)` for
/// the exact-duplicate shortcut (spec §4.D step 3). Order-independent by
/// construction: callers sort their inputs before calling this.
pub fn content_hash(sorted_identifier_tuples: &[String], sorted_enhancement_keys: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for id in sorted_identifier_tuples {
        id.hash(&mut hasher);
    }
    for key in sorted_enhancement_keys {
        key.hash(&mut hasher);
    }
    hasher.finish()
}

/// Normalize free text for comparison: lowercase, strip punctuation, collapse
/// whitespace. Used by the dedup engine's title-Jaccard features.
pub fn normalize_text(s: &str) -> String {
    let lowered = s.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<&str>>().join(" ")
}
