//! Scaling triggers.

use serde::{Deserialize, Serialize};

use crate::policy::Operator;

/// A scaling trigger derived from one policy rule, delivered to an
/// evaluator as part of a per-tick batch and, when breached, posted to
/// the Scaling Engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub app_id: String,
    pub metric_type: String,
    /// Filled in from the aggregated metrics just before the scale call.
    #[serde(default)]
    pub metric_unit: String,
    pub breach_duration_secs: i64,
    pub threshold: i64,
    pub operator: Operator,
    pub cool_down_secs: i64,
    pub adjustment: String,
}
