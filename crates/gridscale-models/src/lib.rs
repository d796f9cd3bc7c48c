//! gridscale-models — shared domain types for the Gridscale control plane.
//!
//! Policies, raw and aggregated metrics, scaling triggers, and the
//! database-lock row. All types are serializable to/from JSON for
//! storage and for the wire.

pub mod lock;
pub mod metrics;
pub mod policy;
pub mod trigger;

pub use lock::Lock;
pub use metrics::{AppInstanceMetric, AppMetric, AppMonitor, Order};
pub use policy::{Operator, Policy, ScalingRule};
pub use trigger::Trigger;
