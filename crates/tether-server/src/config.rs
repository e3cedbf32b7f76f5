//! Server configuration: defaults, JSON file loading, and environment
//! overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for the Tether server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind (default `4700`; `0` auto-assigns).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Expected interval between client heartbeats, in seconds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Silence tolerated before a session is torn down, in seconds.
    /// Must exceed one heartbeat interval.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Deadline applied to each dispatched request, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Capacity of each session's outbound frame buffer.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
    /// Bearer token required at WebSocket upgrade. `None` admits all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4700
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_heartbeat_timeout_secs() -> u64 {
    45
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_send_buffer() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            send_buffer: default_send_buffer(),
            auth_token: None,
        }
    }
}

impl ServerConfig {
    /// Expected heartbeat interval as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Heartbeat grace window as a [`Duration`].
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Per-request dispatch deadline as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `host:port` string for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loads configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Loads from a file when given one, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Applies `TETHER_*` overrides from the process environment.
    #[must_use]
    pub fn apply_env_overrides(self) -> Self {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies `TETHER_*` overrides through an injectable lookup.
    ///
    /// Unparsable values are logged and the existing value kept.
    #[must_use]
    pub fn apply_env_overrides_from(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = get("TETHER_HOST") {
            self.host = host;
        }
        if let Some(port) = get("TETHER_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!(value = %port, "TETHER_PORT is not a valid port, keeping current"),
            }
        }
        override_u64(&get, "TETHER_HEARTBEAT_INTERVAL_SECS", &mut self.heartbeat_interval_secs);
        override_u64(&get, "TETHER_HEARTBEAT_TIMEOUT_SECS", &mut self.heartbeat_timeout_secs);
        override_u64(&get, "TETHER_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        if let Some(buffer) = get("TETHER_SEND_BUFFER") {
            match buffer.parse() {
                Ok(buffer) => self.send_buffer = buffer,
                Err(_) => {
                    warn!(value = %buffer, "TETHER_SEND_BUFFER is not a valid size, keeping current");
                }
            }
        }
        if let Some(token) = get("TETHER_AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
        self
    }
}

fn override_u64(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut u64) {
    if let Some(value) = get(key) {
        match value.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(key, value = %value, "not a valid number, keeping current"),
        }
    }
}

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file was not valid JSON for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}
