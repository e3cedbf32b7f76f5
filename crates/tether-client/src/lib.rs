//! # tether-client
//!
//! The consumer side of the wire: a reconnecting WebSocket client.
//! One driver task owns the socket and the connection state machine;
//! the [`Client`] handle correlates calls with responses, queues sends
//! while the link is down, heartbeats the server, and redials on loss
//! with capped exponential backoff.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
mod driver;
pub mod error;
pub mod state;

pub use client::{Client, SendOutcome};
pub use config::{AuthConfig, AuthPolicy, ClientConfig};
pub use error::ClientError;
pub use state::{ClientEvent, ConnectionState};
