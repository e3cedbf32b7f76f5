//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tether_core::retry::RetryConfig;

/// Default server URL dialed when none is configured.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:4700/ws";

/// Configuration for the reconnecting client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the server's `/ws` endpoint.
    #[serde(default = "default_url")]
    pub url: String,
    /// Seconds between outbound heartbeat pings.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Pong silence tolerated before the link is declared dead, in
    /// seconds. Must exceed one heartbeat interval.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Deadline applied to each call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Capacity of the outbound queue held while the link is down.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// In-band authentication exchanged first on every connect.
    /// `None` opens the send gate as soon as the socket is up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Reconnect backoff schedule.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_url() -> String {
    DEFAULT_URL.into()
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

fn default_queue_capacity() -> usize {
    256
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            queue_capacity: default_queue_capacity(),
            auth: None,
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration for a given server URL, defaults elsewhere.
    #[must_use]
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Heartbeat send interval as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Pong grace window as a [`Duration`].
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Per-call deadline as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// In-band authentication settings.
///
/// When configured, the client sends `{id, name: tool, parameters}` as
/// the first frame after every physical connect and holds application
/// sends until the matching response arrives. A success response opens
/// the gate; an error response is a definitive rejection regardless of
/// policy. The policy only decides what happens when no response
/// arrives within the grace window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Tool name invoked to authenticate.
    pub tool: String,
    /// Parameter object sent with the auth request (token, identity).
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Decision when the grace window elapses without a response.
    #[serde(default)]
    pub policy: AuthPolicy,
    /// Grace window in seconds.
    #[serde(default = "default_auth_grace_secs")]
    pub grace_secs: u64,
}

fn default_auth_grace_secs() -> u64 {
    10
}

impl AuthConfig {
    /// Auth settings for a tool taking a single `token` parameter.
    #[must_use]
    pub fn bearer(tool: impl Into<String>, token: impl Into<String>) -> Self {
        let mut parameters = Map::new();
        let _ = parameters.insert("token".to_string(), Value::String(token.into()));
        Self {
            tool: tool.into(),
            parameters,
            policy: AuthPolicy::default(),
            grace_secs: default_auth_grace_secs(),
        }
    }

    /// Grace window as a [`Duration`].
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// What to do when the auth grace window elapses unanswered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthPolicy {
    /// Treat silence as rejection: fail queued sends with `AUTH_FAILED`
    /// and stop reconnecting.
    #[default]
    FailClosed,
    /// Log a warning and open the send gate anyway.
    FailOpen,
}
