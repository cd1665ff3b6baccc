//! Service configuration
//!
//! Optional JSON file first, then `COLDSIGN_*` environment overrides.

use coldsign_coordinator::{ConfigError, CoordinatorConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const ENV_HOST: &str = "COLDSIGN_HOST";
pub const ENV_PORT: &str = "COLDSIGN_PORT";
pub const ENV_DATA_DIR: &str = "COLDSIGN_DATA_DIR";
pub const ENV_SWEEP_INTERVAL: &str = "COLDSIGN_SWEEP_INTERVAL_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Holds `requests.db` and `audit.jsonl`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// File (if given) plus process environment, validated
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.coordinator.validate()?;
        Ok(config)
    }

    /// Apply `COLDSIGN_*` overrides from `lookup`
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{ENV_PORT}={port} is not a port")))?;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(ENV_SWEEP_INTERVAL) {
            self.coordinator.sweep_interval_secs = secs.parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_SWEEP_INTERVAL}={secs} is not a number"))
            })?;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
