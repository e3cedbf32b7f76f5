//! WebSocket transport: per-session state, liveness monitoring,
//! fan-out, and the session lifecycle loop.

pub mod connection;
pub mod heartbeat;
pub mod manager;
pub mod session;
