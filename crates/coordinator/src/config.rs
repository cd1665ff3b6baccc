//! Coordinator configuration
//!
//! Every field has a default so a partial JSON file is enough.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Rejected configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables of the signing coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// TTL applied when a creation request does not name one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Upper bound on any requested TTL
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,

    /// Largest frame the physical carrier can hold (bytes)
    #[serde(default = "default_carrier_capacity")]
    pub carrier_capacity: usize,

    /// Period of the expiration sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    86_400
}

fn default_max_ttl_secs() -> u64 {
    7 * 86_400
}

// binary capacity of a version 40 QR symbol at error correction level L
fn default_carrier_capacity() -> usize {
    2_953
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_ttl_secs: default_max_ttl_secs(),
            carrier_capacity: default_carrier_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::Invalid("default_ttl_secs must be positive".into()));
        }
        if self.default_ttl_secs > self.max_ttl_secs {
            return Err(ConfigError::Invalid(format!(
                "default_ttl_secs ({}) exceeds max_ttl_secs ({})",
                self.default_ttl_secs, self.max_ttl_secs
            )));
        }
        if self.max_ttl_secs > i64::MAX as u64 / 1_000 {
            return Err(ConfigError::Invalid("max_ttl_secs is out of range".into()));
        }
        if self.carrier_capacity == 0 {
            return Err(ConfigError::Invalid("carrier_capacity must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::seconds(self.default_ttl_secs as i64)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::seconds(self.max_ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.default_ttl_secs, 86_400);
        assert_eq!(config.max_ttl_secs, 604_800);
        assert_eq!(config.carrier_capacity, 2_953);
        assert_eq!(config.sweep_interval_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"sweep_interval_secs": 5}"#).unwrap();
        assert_eq!(config.sweep_interval_secs, 5);
        assert_eq!(config.default_ttl_secs, 86_400);
    }

    #[test]
    fn test_validation() {
        let mut config = CoordinatorConfig {
            default_ttl_secs: 10,
            max_ttl_secs: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_ttl_secs = 60;
        config.carrier_capacity = 0;
        assert!(config.validate().is_err());

        config.carrier_capacity = 512;
        config.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("coordinator.json");
        std::fs::write(&path, r#"{"carrier_capacity": 1200}"#).unwrap();
        let config = CoordinatorConfig::from_file(&path).unwrap();
        assert_eq!(config.carrier_capacity, 1200);

        std::fs::write(&path, r#"{"default_ttl_secs": 0}"#).unwrap();
        assert!(matches!(
            CoordinatorConfig::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
