//! Scaling policies.
//!
//! A policy is an immutable document keyed by app id: instance count
//! bounds plus a list of scaling rules. Policies are reloaded wholesale
//! on each poll; nothing mutates them in place.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for an application.
pub type AppId = String;

/// A scaling policy for one application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub app_id: AppId,
    pub instance_min_count: u32,
    pub instance_max_count: u32,
    pub scaling_rules: Vec<ScalingRule>,
}

/// One threshold rule inside a policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingRule {
    /// Metric this rule watches, e.g. "memoryused".
    pub metric_type: String,
    /// Aggregation window in seconds; non-positive falls back to the
    /// configured default.
    #[serde(default)]
    pub stat_window_secs: i64,
    /// How long the threshold must be continuously breached, in seconds.
    #[serde(default)]
    pub breach_duration_secs: i64,
    pub threshold: i64,
    pub operator: Operator,
    /// Post-action suppression window in seconds.
    #[serde(default)]
    pub cool_down_secs: i64,
    /// Instance-count adjustment, e.g. "+1" or "-2".
    pub adjustment: String,
}

impl ScalingRule {
    pub fn stat_window(&self, default_secs: i64) -> Duration {
        secs_or_default(self.stat_window_secs, default_secs)
    }

    pub fn breach_duration(&self, default_secs: i64) -> Duration {
        secs_or_default(self.breach_duration_secs, default_secs)
    }

    pub fn cool_down(&self, default_secs: i64) -> Duration {
        secs_or_default(self.cool_down_secs, default_secs)
    }
}

fn secs_or_default(secs: i64, default_secs: i64) -> Duration {
    if secs > 0 {
        Duration::from_secs(secs as u64)
    } else {
        Duration::from_secs(default_secs.max(0) as u64)
    }
}

/// Comparison operator of a scaling rule.
///
/// Serialized as the literal symbol (`">"`, `">="`, `"<"`, `"<="`);
/// any other symbol fails deserialization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl Operator {
    /// Whether `value` breaches `threshold` under this operator.
    pub fn breaches(self, value: i64, threshold: i64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Ge => value >= threshold,
            Operator::Lt => value < threshold,
            Operator::Le => value <= threshold,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        };
        f.write_str(s)
    }
}
