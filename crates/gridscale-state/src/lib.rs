//! gridscale-state — embedded state persistence for Gridscale.
//!
//! Holds scaling policies and aggregated app metrics in redb tables.
//! Values are JSON-serialized; metric keys embed the timestamp so
//! range scans come back time-ordered.

mod error;
mod store;
mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
