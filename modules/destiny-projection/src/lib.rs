//! Projection Builder: folds a canonical reference and its duplicates into
//! the deduplicated read model, indexes it, and percolates the change.

pub mod builder;
pub mod worker;

pub use builder::ProjectionBuilder;
