//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming a TOML config file for the C entry points
pub const CONFIG_ENV: &str = "PIPE_TUNNEL_CONFIG";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session log sink configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Background runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Load from the file named by `PIPE_TUNNEL_CONFIG`, or use defaults when
    /// the variable is unset
    pub fn from_env() -> Result<Self, crate::Error> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }
}

/// Log sink presentation. The level itself is fixed at DEBUG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Include the record's target (module path)
    pub with_target: bool,
    /// Include the emitting thread's id
    pub thread_ids: bool,
    /// Prefix each record with a timestamp
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            with_target: true,
            thread_ids: false,
            timestamps: true,
        }
    }
}

/// Runtime that hosts tunnel sessions for the life of the process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Async worker threads
    pub worker_threads: usize,
    /// Upper bound on the runtime's blocking pool. Sessions run on threads
    /// of their own and do not count against it.
    pub max_blocking_threads: usize,
    /// Name given to runtime threads
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            max_blocking_threads: 64,
            thread_name: "pipe-tunnel".to_string(),
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    Config {
        logging: LoggingConfig::default(),
        runtime: RuntimeConfig::default(),
    }
}
