//! Raw and aggregated metric types.
//!
//! `AppInstanceMetric` is what the metrics backend delivers per
//! instance; `AppMetric` is the per-app aggregate the pipeline
//! persists and evaluates. `AppMonitor` is the ephemeral work item
//! that tells a poller to go fetch.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw per-instance sample from the metrics backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppInstanceMetric {
    pub app_id: String,
    pub instance_index: u32,
    /// When the collector picked the sample up (unix nanos).
    pub collected_at: i64,
    pub name: String,
    pub unit: String,
    /// Raw value as delivered; parsed to an integer at aggregation time.
    pub value: String,
    /// Sample timestamp (unix nanos), ordered per instance.
    pub timestamp: i64,
}

/// An aggregated per-app sample for one evaluation window.
///
/// `value` is optional on the wire; evaluators treat a missing value
/// as non-breaching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppMetric {
    pub app_id: String,
    pub metric_type: String,
    pub unit: String,
    pub value: Option<i64>,
    /// Aggregation timestamp (unix nanos).
    pub timestamp: i64,
}

/// Work item: fetch and aggregate this app/metric now.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppMonitor {
    pub app_id: String,
    pub metric_type: String,
    pub stat_window: Duration,
}

/// Sort order for metric range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Error for an unrecognized order token in a query string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid order: {0}")]
pub struct InvalidOrder(pub String);

impl FromStr for Order {
    type Err = InvalidOrder;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            other => Err(InvalidOrder(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_parses_case_insensitively() {
        assert_eq!("asc".parse::<Order>().unwrap(), Order::Asc);
        assert_eq!("DESC".parse::<Order>().unwrap(), Order::Desc);
        assert!("ascending".parse::<Order>().is_err());
    }

    #[test]
    fn order_defaults_to_ascending() {
        assert_eq!(Order::default(), Order::Asc);
    }

    #[test]
    fn instance_metric_decodes_backend_payload() {
        let body = r#"[{
            "app_id": "app-id",
            "instance_index": 0,
            "collected_at": 1000,
            "name": "memoryused",
            "unit": "megabytes",
            "value": "622222",
            "timestamp": 1000
        }]"#;
        let samples: Vec<AppInstanceMetric> = serde_json::from_str(body).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, "622222");
    }
}
