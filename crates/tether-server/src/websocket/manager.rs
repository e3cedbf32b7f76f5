//! Fan-out across live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use tether_core::SessionId;
use tether_rpc::envelope::EventFrame;

use super::connection::Session;

/// Tracks every live session and pushes events to all of them.
///
/// Sessions add themselves when their loop starts and remove
/// themselves in their own close path; nothing else removes entries,
/// so a session can never be yanked out from under its loop.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a session.
    pub async fn add(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        let _ = sessions.insert(session.id.clone(), session);
    }

    /// Deregisters a session. Called only from that session's close
    /// path.
    pub async fn remove(&self, id: &SessionId) {
        let mut sessions = self.sessions.write().await;
        let _ = sessions.remove(id);
    }

    /// Pushes an event to every open session, best effort.
    ///
    /// The frame is serialized once; deliveries that would block are
    /// dropped and logged. Returns the number of sessions reached.
    pub async fn broadcast(&self, event: &EventFrame) -> usize {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = %event.event, error = %err, "failed to serialize broadcast event");
                return 0;
            }
        };

        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for session in sessions.values() {
            if session.send(frame.clone()) {
                delivered += 1;
            } else {
                warn!(session_id = %session.id, event = %event.event, "broadcast not delivered");
            }
        }
        debug!(event = %event.event, delivered, total = sessions.len(), "broadcast");
        delivered
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Ids of every live session.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
