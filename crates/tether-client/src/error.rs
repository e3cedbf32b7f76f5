//! Client-side error type.

use thiserror::Error;

use tether_rpc::RpcError;

/// Errors surfaced by [`Client`](crate::Client) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A protocol-level failure: the server answered with an error
    /// body, the request timed out, or the connection dropped while
    /// the request was in flight.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The outbound queue is at capacity; the request was not
    /// accepted.
    #[error("outbound queue is full ({capacity} requests waiting)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The client's driver task has already shut down.
    #[error("client is closed")]
    Closed,
}
