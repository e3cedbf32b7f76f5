//! # tether-rpc
//!
//! Wire protocol core shared by every transport: the envelope codec
//! (requests, responses, heartbeats, and push events behind a single
//! tagged union resolved once at decode), the error taxonomy, and the
//! correlation registry that pairs in-flight request ids with waiting
//! callers.

#![deny(unsafe_code)]

pub mod correlation;
pub mod envelope;
pub mod errors;

pub use correlation::{CorrelationRegistry, ResponseFuture, DEFAULT_DEADLINE};
pub use envelope::{DecodeError, Envelope, ErrorBody, EventFrame, Ping, Request, Response};
pub use errors::RpcError;
