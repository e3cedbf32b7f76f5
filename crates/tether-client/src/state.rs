//! Connection lifecycle state and the client event stream.

use tether_rpc::EventFrame;

/// Where the client currently is in its connection lifecycle.
///
/// The client moves `Disconnected` → `Connecting` → `Connected`, and
/// after a lost link `Reconnecting` → `Connected` again. A definitive
/// authentication rejection or an explicit disconnect returns it to
/// `Disconnected`, where it stays until [`Client::connect`] is called.
///
/// [`Client::connect`]: crate::Client::connect
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link, and no dial in progress.
    Disconnected,
    /// First dial for this connect cycle is in flight.
    Connecting,
    /// Link is up and the send gate is open (or opening).
    Connected,
    /// Link was lost; a redial is scheduled.
    Reconnecting {
        /// Zero-based attempt counter feeding the backoff schedule.
        attempt: u32,
    },
}

impl ConnectionState {
    /// Whether the link is up.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Out-of-band notifications emitted by the driver.
///
/// Delivered over a broadcast channel; subscribers that fall behind
/// lose the oldest events, never responses (those travel through the
/// correlation registry).
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// Link established and the send gate opened; queued requests
    /// have been flushed.
    Connected,
    /// Link went down, with the reason.
    Disconnected {
        /// Human-readable cause (socket error, heartbeat silence,
        /// explicit disconnect).
        reason: String,
    },
    /// The server pushed a fresh schema catalog; it is now readable
    /// via [`Client::schemas`](crate::Client::schemas).
    SchemasUpdated,
    /// Any other server-initiated event frame.
    Push(EventFrame),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_counts_as_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Reconnecting { attempt: 3 }.is_connected());
    }
}
