//! Daemon configuration.
//!
//! One TOML file covers both modes; sections a mode doesn't use are
//! ignored. Every section has full defaults so an empty file is a
//! valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use gridscale_eventgen::config::{AggregatorConfig, BreakerConfig, EvaluatorConfig};
use gridscale_lock::LockConfig;
use gridscale_operator::OperatorConfig;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub metrics_backend: BackendConfig,
    pub scaling_engine: BackendConfig,
    pub aggregator: AggregatorConfig,
    pub evaluator: EvaluatorConfig,
    pub breaker: BreakerConfig,
    pub lock: LockConfig,
    pub operator: OperatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the read API listens on.
    pub port: u16,
    /// Directory for the embedded state database.
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6105,
            data_dir: PathBuf::from("/var/lib/gridscale"),
        }
    }
}

/// Address and timeout of one HTTP backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:6103".to_string(),
            timeout_secs: 5,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Read and parse the config file; any failure is fatal at startup.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}
