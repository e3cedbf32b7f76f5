//! # tether-core
//!
//! Foundation types shared by every Tether crate:
//!
//! - **Branded IDs**: `RequestId` (UUID v4) and `SessionId` (UUID v7) as
//!   newtypes so a correlation id can never be confused with a session id
//! - **Backoff**: `RetryConfig` and the capped exponential delay schedule
//!   used by the reconnecting client

#![deny(unsafe_code)]

pub mod ids;
pub mod retry;

pub use ids::{RequestId, SessionId};
pub use retry::RetryConfig;
