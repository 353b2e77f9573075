//! Persistence Gateway: typed access to the relational store (identifiers,
//! decisions, robots) and the search store (projection index + percolator).
//!
//! Both halves are exposed as separate handles rather than one god-object —
//! callers that only need `find_references_by_identifiers` never have to
//! construct an OpenSearch client, and vice versa.

pub mod relational;
pub mod search;

pub use relational::{NewDecision, RelationalStore};
pub use search::{validate_automation_query, PercolateHit, SearchHit, SearchIndex, SearchQuery};
