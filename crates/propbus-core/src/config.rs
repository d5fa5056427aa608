/*!
 * Configuration management for propbus.
 *
 * This module provides functionality to load, validate, and access
 * configuration settings for propbus components.
 */
use std::path::Path;
use std::sync::Arc;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Core configuration for propbus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Messaging configuration
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Simulation configuration
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Application environment (development, production, etc.)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log filter (e.g., "info", "propbus=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Messaging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Capacity of each device's broadcast message buffer; lagging
    /// subscribers drop the oldest messages beyond this depth
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Default integration tick for simulated devices, in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            logging: LoggingConfig::default(),
            messaging: MessagingConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            environment: default_environment(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            message_buffer: default_message_buffer(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

fn default_app_name() -> String {
    "propbus".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_message_buffer() -> usize {
    1024
}

fn default_tick_ms() -> u64 {
    50
}

impl Config {
    /// Load configuration from an optional file and `PROPBUS_*` environment
    /// variables, falling back to defaults for anything unset
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = ConfigLib::builder();

        let defaults = Config::default();
        builder = builder.add_source(
            ConfigLib::try_from(&defaults)
                .map_err(|e| Error::config(format!("Failed to build defaults: {}", e)))?,
        );

        if let Some(path) = path {
            let path = path.as_ref();
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("PROPBUS").separator("__"));

        builder
            .build()
            .map_err(|e| Error::config(format!("Failed to load configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Invalid configuration: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.messaging.message_buffer == 0 {
            return Err(Error::config("messaging.message_buffer must be positive"));
        }
        if self.simulation.tick_ms == 0 {
            return Err(Error::config("simulation.tick_ms must be positive"));
        }
        Ok(())
    }
}

/// A reference-counted configuration shared between components
pub type SharedConfig = Arc<Config>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.general.app_name, "propbus");
        assert_eq!(config.messaging.message_buffer, 1024);
        assert_eq!(config.simulation.tick_ms, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.messaging.message_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_without_file() {
        let config = Config::load(None::<&str>).unwrap();
        assert_eq!(config.logging.level, "info");
    }
}
