use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::code::CODE_SPACE;
use crate::error::{RelayError, Result};
use crate::poll::DEFAULT_QUEUE_CAPACITY;

/// Deployment settings for the relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host address for the HTTP server (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the HTTP server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between liveness probes; also the probe deadline (default: 30)
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Seconds without activity before a session is swept (default: 3600)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Messages buffered per direction for polling peers (default: 256)
    #[serde(default = "default_poll_queue_capacity")]
    pub poll_queue_capacity: usize,

    /// Upper bound on concurrent sessions (default: 8000)
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

fn default_poll_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_sessions() -> usize {
    8000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            probe_interval_secs: default_probe_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            poll_queue_capacity: default_poll_queue_capacity(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults, overlaid by `path` if given, then by the `PORT` environment variable.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Ok(port) = std::env::var("PORT") {
            config.port = port
                .parse()
                .map_err(|e| RelayError::Config(format!("Invalid PORT '{port}': {e}")))?;
        }
        Ok(config)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_secs == 0 {
            return Err(RelayError::Config("probe_interval_secs must be > 0".into()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(RelayError::Config("idle_timeout_secs must be > 0".into()));
        }
        if self.poll_queue_capacity == 0 {
            return Err(RelayError::Config("poll_queue_capacity must be > 0".into()));
        }
        if self.max_sessions == 0 || self.max_sessions > CODE_SPACE {
            return Err(RelayError::Config(format!(
                "max_sessions must be between 1 and {CODE_SPACE}"
            )));
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Returns the server bind address string (e.g., "0.0.0.0:8080").
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
