//! Automation Dispatcher: percolates every projection rebuild against the
//! stored robot automations, aggregates the hits into a short window per
//! target robot, and turns each window into a new enhancement request.
//!
//! The percolation call itself lives in `destiny-projection::ProjectionBuilder
//! ::rebuild` — one search-index round trip per rebuild, not a separate pass
//! here. This crate owns everything downstream of a hit: registering the
//! queries percolation runs against, aggregating hits across the window, and
//! honoring `originating_robot_id` so a robot's own result can't spawn a new
//! request back to itself.

pub mod aggregate;
pub mod registration;
pub mod worker;

pub use aggregate::{PendingRequest, Window};
pub use registration::{register, remove};
pub use worker::Dispatcher;
