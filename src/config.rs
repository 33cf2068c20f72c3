//! Configuration
//!
//! One JSON file with four sections, every field optional:
//!
//! ```json
//! {
//!   "server":   { "host": "0.0.0.0", "port": 8090, "cors_origins": [] },
//!   "push":     { "write_queue_capacity": 256, "write_timeout_ms": 10000, "event_buffer": 1024 },
//!   "logging":  { "level": "info", "format": "pretty" },
//!   "channels": [ { "name": "notifications", "scope": "session" } ]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::http_server::HttpServerConfig;
use crate::push::{ChannelName, PushError, PushResult, ScopeKind};

/// Top-level configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: HttpServerConfig,

    #[serde(default)]
    pub push: PushSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Channels declared at startup
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Push facility tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    /// Messages queued per connection before writes fail with backpressure (default: 256)
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,

    /// Upper bound on one frame write in milliseconds (default: 10000)
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Lifecycle events buffered per slow observer (default: 1024)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_write_queue_capacity() -> usize {
    256
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            write_queue_capacity: default_write_queue_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl PushSettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "socketpush=debug" (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// A channel declared in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub scope: ScopeKind,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> PushResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| PushError::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| PushError::Config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> PushResult<()> {
        if self.push.write_queue_capacity == 0 {
            return Err(PushError::Config("write_queue_capacity must be > 0".into()));
        }

        if self.push.write_timeout_ms == 0 {
            return Err(PushError::Config("write_timeout_ms must be > 0".into()));
        }

        if self.push.event_buffer == 0 {
            return Err(PushError::Config("event_buffer must be > 0".into()));
        }

        EnvFilter::try_new(&self.logging.level).map_err(|e| {
            PushError::Config(format!("Invalid log level '{}': {}", self.logging.level, e))
        })?;

        let mut seen = HashSet::new();
        for channel in &self.channels {
            ChannelName::new(&channel.name)?;
            if !seen.insert(channel.name.as_str()) {
                return Err(PushError::Config(format!(
                    "Channel '{}' declared twice",
                    channel.name
                )));
            }
        }

        Ok(())
    }
}
