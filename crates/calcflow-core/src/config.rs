//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or a missing section) is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dispatcher: DispatcherConfig,
    pub view: ViewConfig,
    pub node: NodeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Sends of one fragment before it is split.
    pub max_job_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_job_attempts: 2,
            retry_base_delay_ms: 0,
            retry_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// A cycle still waiting for job results after this long is abandoned.
    pub cycle_timeout_ms: u64,
}

impl ViewConfig {
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            cycle_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Label reported in job results by the in-process compute node.
    pub node_id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "local".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.max_job_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "dispatcher.max_job_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.dispatcher.retry_multiplier.is_finite() && self.dispatcher.retry_multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                key: "dispatcher.retry_multiplier",
                reason: "must be a finite number >= 1.0".to_string(),
            });
        }
        if self.view.cycle_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "view.cycle_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
