//! redb table definitions for the Gridscale state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types).

use redb::TableDefinition;

/// Scaling policies keyed by `{app_id}`.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Aggregated app metrics keyed by `{app_id}:{metric_type}:{timestamp:020}`.
///
/// Zero-padding the nanosecond timestamp keeps lexicographic key order
/// equal to time order, so range scans walk metrics oldest-first.
pub const APP_METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("app_metrics");
