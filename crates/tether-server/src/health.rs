//! Health check endpoint payload.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Response body for `GET /health`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Number of live WebSocket sessions.
    pub sessions: usize,
}

/// Builds the health payload from current server state.
#[must_use]
pub fn health_check(start_time: Instant, sessions: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0);
        assert_eq!(resp.status, "ok");
    }

    #[test]
    fn session_count_passes_through() {
        let resp = health_check(Instant::now(), 7);
        assert_eq!(resp.sessions, 7);
    }

    #[test]
    fn uptime_reflects_start_time() {
        let resp = health_check(Instant::now(), 0);
        assert!(resp.uptime_secs < 5);
    }

    #[test]
    fn serializes_with_expected_fields() {
        let resp = health_check(Instant::now(), 2);
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("status").is_some());
        assert!(value.get("uptime_secs").is_some());
        assert!(value.get("sessions").is_some());
    }
}
