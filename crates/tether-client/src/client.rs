//! Public client handle.
//!
//! [`Client`] is a cheap facade over a spawned driver task. Calls
//! register with the shared correlation registry first and then travel
//! to the driver over a command channel, so a response can never beat
//! its registration.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use tether_core::RequestId;
use tether_rpc::{CorrelationRegistry, Request, RpcError};

use crate::config::ClientConfig;
use crate::driver::{Command, Driver};
use crate::error::ClientError;
use crate::state::{ClientEvent, ConnectionState};

/// Capacity of the handle-to-driver command channel.
const COMMAND_BUFFER: usize = 64;

/// Capacity of the out-of-band event broadcast.
const EVENT_BUFFER: usize = 32;

/// How a submitted request left the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the live socket.
    Sent,
    /// Held in the outbound queue until the link comes up.
    Queued,
}

/// Handle to a reconnecting tool-invocation client.
///
/// Dropping the handle closes the command channel; the driver rejects
/// everything still pending and exits.
pub struct Client {
    command_tx: mpsc::Sender<Command>,
    registry: Arc<CorrelationRegistry>,
    schemas: Arc<RwLock<Vec<Value>>>,
    events: broadcast::Sender<ClientEvent>,
    state: watch::Receiver<ConnectionState>,
    config: Arc<ClientConfig>,
    _driver: JoinHandle<()>,
}

impl Client {
    /// Spawns the driver task and returns its handle.
    ///
    /// The driver idles until [`Self::connect`] is called; requests
    /// submitted before then queue up to the configured capacity. Must
    /// be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(CorrelationRegistry::new());
        let schemas = Arc::new(RwLock::new(Vec::new()));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let driver = Driver::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&schemas),
            events.clone(),
            state_tx,
        );

        Self {
            command_tx,
            registry,
            schemas,
            events,
            state: state_rx,
            config,
            _driver: tokio::spawn(driver.run(command_rx)),
        }
    }

    /// Starts the connect loop. A no-op while already dialing or
    /// connected.
    pub async fn connect(&self) {
        let _ = self.command_tx.send(Command::Connect).await;
    }

    /// Closes the link and goes idle until the next [`Self::connect`].
    ///
    /// In-flight requests and the outbound queue are rejected with
    /// `DISCONNECTED`. Returns once the driver has acknowledged.
    pub async fn disconnect(&self) {
        let (done, acked) = oneshot::channel();
        if self.command_tx.send(Command::Disconnect { done }).await.is_ok() {
            let _ = acked.await;
        }
    }

    /// Invokes a tool under a fresh UUID and awaits its result.
    ///
    /// See [`Self::call_with_id`] for the full semantics.
    pub async fn call(
        &self,
        name: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        self.call_with_id(RequestId::new().into_inner(), name, parameters)
            .await
    }

    /// Invokes a tool under a caller-chosen correlation id.
    ///
    /// The id registers before the frame leaves, subject to the
    /// configured request deadline. While the link is down the request
    /// queues and flushes on the next connect; the deadline keeps
    /// running either way. Fails fast with `DUPLICATE_ID` when the id
    /// is already in flight and with [`ClientError::QueueFull`] when
    /// the queue is at capacity.
    pub async fn call_with_id(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let id = id.into();
        let response = self
            .registry
            .register(&id, Some(self.config.request_timeout()))?;
        let request = Request::new(id.clone(), name, parameters);
        if let Err(err) = self.submit(request).await {
            // The frame never left; free the id for reuse.
            let _ = self
                .registry
                .reject(&id, RpcError::disconnected("request was not submitted"));
            return Err(err);
        }
        Ok(response.await?)
    }

    /// Submits a pre-built request without awaiting a response.
    ///
    /// Correlation is the caller's problem: responses to ids this
    /// client never registered are logged and dropped.
    pub async fn send(&self, request: Request) -> Result<SendOutcome, ClientError> {
        self.submit(request).await
    }

    async fn submit(&self, request: Request) -> Result<SendOutcome, ClientError> {
        let (reply, outcome) = oneshot::channel();
        self.command_tx
            .send(Command::Send { request, reply })
            .await
            .map_err(|_| ClientError::Closed)?;
        outcome.await.map_err(|_| ClientError::Closed)?
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Waits until the link is up.
    ///
    /// Fails with [`ClientError::Closed`] if the driver exits first.
    pub async fn wait_until_connected(&self) -> Result<(), ClientError> {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| state.is_connected())
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(())
    }

    /// Subscribes to out-of-band client events.
    ///
    /// Each subscriber gets an independent cursor; slow subscribers
    /// lose the oldest events first.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Latest schema catalog pushed by the server.
    ///
    /// Empty until the first `schemas` event arrives.
    #[must_use]
    pub fn schemas(&self) -> Vec<Value> {
        self.schemas.read().clone()
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.registry.len()
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(id: &str) -> Request {
        Request::new(id, "echo", Map::new())
    }

    #[tokio::test]
    async fn sends_queue_while_the_link_is_down() {
        let client = Client::new(ClientConfig::default());
        let outcome = client.send(request("q1")).await.unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn queue_overflow_fails_fast() {
        let config = ClientConfig {
            queue_capacity: 2,
            ..ClientConfig::default()
        };
        let client = Client::new(config);
        assert_eq!(client.send(request("q1")).await.unwrap(), SendOutcome::Queued);
        assert_eq!(client.send(request("q2")).await.unwrap(), SendOutcome::Queued);

        let err = client.send(request("q3")).await.unwrap_err();
        assert!(matches!(err, ClientError::QueueFull { capacity: 2 }));
    }

    #[tokio::test]
    async fn a_refused_call_releases_its_id() {
        let config = ClientConfig {
            queue_capacity: 1,
            ..ClientConfig::default()
        };
        let client = Client::new(config);
        let _ = client.send(request("q1")).await.unwrap();

        let err = client
            .call_with_id("r1", "status", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::QueueFull { .. }));
        // The registration was rolled back, so the id is free again.
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_calls_time_out() {
        let config = ClientConfig {
            request_timeout_secs: 1,
            ..ClientConfig::default()
        };
        let client = Client::new(config);

        let err = client.call("status", Map::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc(RpcError::Timeout { .. })));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_ids_are_rejected_while_the_first_is_pending() {
        let client = Client::new(ClientConfig::default());

        let first = client.call_with_id("r1", "status", Map::new());
        tokio::pin!(first);
        // Drive the first call far enough to register its id.
        assert!(
            tokio::time::timeout(Duration::ZERO, &mut first)
                .await
                .is_err()
        );

        let err = client
            .call_with_id("r1", "status", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rpc(RpcError::DuplicateId { .. })
        ));
        assert_eq!(client.pending_requests(), 1);
    }

    #[tokio::test]
    async fn disconnect_rejects_queued_requests() {
        let client = Arc::new(Client::new(ClientConfig::default()));
        let worker = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call_with_id("r1", "status", Map::new()).await })
        };
        while client.pending_requests() == 0 {
            tokio::task::yield_now().await;
        }

        client.disconnect().await;

        let err = worker.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rpc(RpcError::Disconnected { .. })
        ));
        assert_eq!(client.pending_requests(), 0);
    }
}
