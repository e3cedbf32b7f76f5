//! Connection driver task.
//!
//! The driver owns the socket and the reconnect state machine. It
//! idles until told to connect, then cycles dial → session → backoff
//! until it is told to disconnect or the handle is dropped. Requests
//! arriving while no link is up wait in a bounded FIFO queue and flush
//! when the send gate opens; requests already written to a dead socket
//! are rejected, never resent.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use tether_core::RequestId;
use tether_rpc::envelope::{EVENT_PONG, EVENT_SCHEMAS};
use tether_rpc::{CorrelationRegistry, Envelope, EventFrame, Ping, Request, Response, RpcError};

use crate::client::SendOutcome;
use crate::config::{AuthPolicy, ClientConfig};
use crate::error::ClientError;
use crate::state::{ClientEvent, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Commands from the handle to its driver.
pub(crate) enum Command {
    /// Start dialing if idle.
    Connect,
    /// Close the link, discard the queue, and go idle.
    Disconnect {
        /// Acked once the driver is idle again.
        done: oneshot::Sender<()>,
    },
    /// Write a request now or queue it for the next connect.
    Send {
        request: Request,
        reply: oneshot::Sender<Result<SendOutcome, ClientError>>,
    },
}

enum IdleEnd {
    Dial,
    Shutdown,
}

enum SessionEnd {
    /// Link died; back off and redial.
    Lost,
    /// Caller asked for the link to close; go idle.
    Disconnect,
    /// Definitive authentication failure; go idle.
    AuthFailed,
    /// Handle dropped; exit the driver.
    Shutdown,
}

enum BackoffEnd {
    Redial,
    Idle,
    Shutdown,
}

/// Send gate for a live session.
///
/// While authentication is pending, application requests queue instead
/// of going out, so the auth frame is always first on the wire.
enum Gate {
    Open,
    AwaitingAuth {
        id: String,
        deadline: Instant,
        policy: AuthPolicy,
    },
}

pub(crate) struct Driver {
    config: Arc<ClientConfig>,
    registry: Arc<CorrelationRegistry>,
    schemas: Arc<RwLock<Vec<Value>>>,
    events: broadcast::Sender<ClientEvent>,
    state: watch::Sender<ConnectionState>,
    queue: VecDeque<Request>,
    /// Monotonic connection counter; each epoch owns the registry
    /// entries for the requests written during it.
    epochs: u64,
    /// Consecutive failed connects, reset when a send gate opens.
    attempt: u32,
}

impl Driver {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        registry: Arc<CorrelationRegistry>,
        schemas: Arc<RwLock<Vec<Value>>>,
        events: broadcast::Sender<ClientEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            config,
            registry,
            schemas,
            events,
            state,
            queue: VecDeque::new(),
            epochs: 0,
            attempt: 0,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        'idle: loop {
            match self.idle(&mut commands).await {
                IdleEnd::Dial => {}
                IdleEnd::Shutdown => break,
            }

            loop {
                self.set_state(if self.attempt == 0 {
                    ConnectionState::Connecting
                } else {
                    ConnectionState::Reconnecting {
                        attempt: self.attempt,
                    }
                });
                match connect_async(&self.config.url).await {
                    Ok((socket, _)) => match self.session(socket, &mut commands).await {
                        SessionEnd::Lost => {}
                        SessionEnd::Disconnect | SessionEnd::AuthFailed => continue 'idle,
                        SessionEnd::Shutdown => break 'idle,
                    },
                    Err(err) => {
                        warn!(url = %self.config.url, error = %err, "dial failed");
                        self.emit(ClientEvent::Disconnected {
                            reason: format!("dial failed: {err}"),
                        });
                    }
                }
                match self.backoff(&mut commands).await {
                    BackoffEnd::Redial => {}
                    BackoffEnd::Idle => continue 'idle,
                    BackoffEnd::Shutdown => break 'idle,
                }
            }
        }
        self.shutdown();
    }

    /// Waits for a connect command, queueing sends in the meantime.
    async fn idle(&mut self, commands: &mut mpsc::Receiver<Command>) -> IdleEnd {
        self.attempt = 0;
        self.set_state(ConnectionState::Disconnected);
        loop {
            match commands.recv().await {
                Some(Command::Connect) => return IdleEnd::Dial,
                Some(Command::Send { request, reply }) => self.enqueue(request, reply),
                Some(Command::Disconnect { done }) => {
                    let _ = self.reject_queue(&RpcError::disconnected(
                        "connection closed before delivery",
                    ));
                    let _ = done.send(());
                }
                None => return IdleEnd::Shutdown,
            }
        }
    }

    /// Runs one established connection until it ends.
    async fn session(
        &mut self,
        socket: WsStream,
        commands: &mut mpsc::Receiver<Command>,
    ) -> SessionEnd {
        self.epochs += 1;
        let epoch = format!("conn-{}", self.epochs);
        let (mut ws_tx, mut ws_rx) = socket.split();

        self.set_state(ConnectionState::Connected);
        info!(url = %self.config.url, epoch = %epoch, "socket established");

        let mut gate = match self.config.auth.clone() {
            Some(auth) => {
                let id = RequestId::new().into_inner();
                let grace = auth.grace();
                let request = Request::new(id.clone(), auth.tool, auth.parameters);
                if let Err(err) = write_frame(&mut ws_tx, &request).await {
                    return self.lost(&epoch, &format!("socket error during auth: {err}"));
                }
                debug!(auth_id = %id, "authentication sent, holding application requests");
                Gate::AwaitingAuth {
                    id,
                    deadline: Instant::now() + grace,
                    policy: auth.policy,
                }
            }
            None => Gate::Open,
        };
        if matches!(gate, Gate::Open) {
            if let Err(end) = self.open_gate(&epoch, &mut ws_tx).await {
                return end;
            }
        }

        let interval = self.config.heartbeat_interval();
        let mut pings = time::interval_at(Instant::now() + interval, interval);
        pings.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_pong = Instant::now();

        loop {
            let auth_deadline = match &gate {
                Gate::AwaitingAuth { deadline, .. } => Some(*deadline),
                Gate::Open => None,
            };
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => {}
                    Some(Command::Send { request, reply }) => {
                        if matches!(gate, Gate::Open) {
                            match write_frame(&mut ws_tx, &request).await {
                                Ok(()) => {
                                    let _ = self.registry.set_owner(&request.id, &epoch);
                                    let _ = reply.send(Ok(SendOutcome::Sent));
                                }
                                Err(err) => {
                                    // Never written, so it survives into
                                    // the next epoch's flush.
                                    self.queue.push_back(request);
                                    let _ = reply.send(Ok(SendOutcome::Queued));
                                    return self.lost(&epoch, &format!("socket error: {err}"));
                                }
                            }
                        } else {
                            self.enqueue(request, reply);
                        }
                    }
                    Some(Command::Disconnect { done }) => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        let swept = self
                            .registry
                            .cancel_owner(&epoch, &RpcError::disconnected("client disconnected"));
                        let _ = self.reject_queue(&RpcError::disconnected(
                            "connection closed before delivery",
                        ));
                        info!(epoch = %epoch, swept, "disconnected on request");
                        self.emit(ClientEvent::Disconnected {
                            reason: "client disconnected".to_string(),
                        });
                        let _ = done.send(());
                        return SessionEnd::Disconnect;
                    }
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                },
                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = self
                            .handle_frame(text.as_str(), &mut gate, &epoch, &mut ws_tx, &mut last_pong)
                            .await
                        {
                            return end;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return self.lost(&epoch, "server closed the connection");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        return self.lost(&epoch, &format!("socket error: {err}"));
                    }
                },
                _ = pings.tick() => {
                    if last_pong.elapsed() > self.config.heartbeat_timeout() {
                        return self.lost(&epoch, "heartbeat silence");
                    }
                    if let Err(err) = write_frame(&mut ws_tx, &Ping::now()).await {
                        return self.lost(&epoch, &format!("socket error: {err}"));
                    }
                }
                () = until(auth_deadline) => {
                    if let Gate::AwaitingAuth { policy, .. } = &gate {
                        match policy {
                            AuthPolicy::FailOpen => {
                                warn!("authentication unanswered within grace, opening anyway");
                                gate = Gate::Open;
                                if let Err(end) = self.open_gate(&epoch, &mut ws_tx).await {
                                    return end;
                                }
                            }
                            AuthPolicy::FailClosed => {
                                return self.auth_failed("authentication timed out");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Classifies and handles one inbound text frame.
    async fn handle_frame(
        &mut self,
        text: &str,
        gate: &mut Gate,
        epoch: &str,
        ws_tx: &mut WsSink,
        last_pong: &mut Instant,
    ) -> Option<SessionEnd> {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "undecodable frame from server, ignoring");
                return None;
            }
        };
        match envelope {
            Envelope::Response(response) => {
                let settles_auth = matches!(
                    &*gate,
                    Gate::AwaitingAuth { id, .. } if id.as_str() == response.id()
                );
                if settles_auth {
                    return self.settle_auth(response, gate, epoch, ws_tx).await;
                }
                self.route_response(response);
                None
            }
            Envelope::Event(event) => {
                self.handle_event(event, last_pong);
                None
            }
            Envelope::Ping(_) => {
                debug!("unexpected ping from server, ignoring");
                None
            }
            Envelope::Request(request) => {
                warn!(tool = %request.name, "server-initiated request, ignoring");
                None
            }
        }
    }

    /// Applies the response to the pending authentication exchange.
    async fn settle_auth(
        &mut self,
        response: Response,
        gate: &mut Gate,
        epoch: &str,
        ws_tx: &mut WsSink,
    ) -> Option<SessionEnd> {
        match response.into_parts() {
            (_, Ok(_)) => {
                debug!("authentication accepted");
                *gate = Gate::Open;
                match self.open_gate(epoch, ws_tx).await {
                    Ok(()) => None,
                    Err(end) => Some(end),
                }
            }
            // An explicit rejection is definitive under either policy.
            (_, Err(body)) => {
                Some(self.auth_failed(&format!("authentication rejected: {}", body.message)))
            }
        }
    }

    /// Routes a correlated response into the registry.
    fn route_response(&self, response: Response) {
        let (id, outcome) = response.into_parts();
        // Unknown ids are logged inside the registry and dropped.
        let _ = match outcome {
            Ok(results) => self.registry.resolve(&id, results),
            Err(body) => self.registry.reject(&id, RpcError::from_body(body)),
        };
    }

    /// Handles a server push.
    fn handle_event(&mut self, event: EventFrame, last_pong: &mut Instant) {
        match event.event.as_str() {
            EVENT_PONG => *last_pong = Instant::now(),
            EVENT_SCHEMAS => {
                let catalog = match event.data {
                    Some(Value::Array(entries)) => entries,
                    Some(_) => {
                        warn!("schemas push is not an array, ignoring");
                        return;
                    }
                    None => Vec::new(),
                };
                debug!(tools = catalog.len(), "schema catalog updated");
                *self.schemas.write() = catalog;
                self.emit(ClientEvent::SchemasUpdated);
            }
            _ => self.emit(ClientEvent::Push(event)),
        }
    }

    /// Opens the send gate: resets the backoff schedule and flushes
    /// the queue in arrival order.
    async fn open_gate(&mut self, epoch: &str, ws_tx: &mut WsSink) -> Result<(), SessionEnd> {
        self.attempt = 0;
        let mut flushed = 0usize;
        while let Some(request) = self.queue.pop_front() {
            match write_frame(ws_tx, &request).await {
                Ok(()) => {
                    let _ = self.registry.set_owner(&request.id, epoch);
                    flushed += 1;
                }
                Err(err) => {
                    self.queue.push_front(request);
                    return Err(self.lost(epoch, &format!("socket error during flush: {err}")));
                }
            }
        }
        info!(epoch = %epoch, flushed, "connected");
        self.emit(ClientEvent::Connected);
        Ok(())
    }

    /// Queues a request, failing fast when the queue is at capacity.
    fn enqueue(
        &mut self,
        request: Request,
        reply: oneshot::Sender<Result<SendOutcome, ClientError>>,
    ) {
        if self.queue.len() >= self.config.queue_capacity {
            let _ = reply.send(Err(ClientError::QueueFull {
                capacity: self.config.queue_capacity,
            }));
            return;
        }
        debug!(
            request_id = %request.id,
            tool = %request.name,
            depth = self.queue.len() + 1,
            "request queued until the link is up"
        );
        self.queue.push_back(request);
        let _ = reply.send(Ok(SendOutcome::Queued));
    }

    /// Records a lost link: rejects this epoch's in-flight requests
    /// and leaves the queue intact for the next flush.
    fn lost(&mut self, epoch: &str, reason: &str) -> SessionEnd {
        let swept = self
            .registry
            .cancel_owner(epoch, &RpcError::disconnected("connection lost"));
        warn!(epoch = %epoch, reason = %reason, swept, "connection lost");
        self.emit(ClientEvent::Disconnected {
            reason: reason.to_string(),
        });
        SessionEnd::Lost
    }

    /// Records a definitive authentication failure and goes idle.
    fn auth_failed(&mut self, reason: &str) -> SessionEnd {
        let rejected = self.reject_queue(&RpcError::AuthFailed {
            message: reason.to_string(),
        });
        warn!(reason = %reason, rejected, "authentication failed, going idle");
        self.emit(ClientEvent::Disconnected {
            reason: reason.to_string(),
        });
        SessionEnd::AuthFailed
    }

    /// Sleeps out the backoff delay, still serving commands.
    async fn backoff(&mut self, commands: &mut mpsc::Receiver<Command>) -> BackoffEnd {
        let delay = self.config.retry.delay(self.attempt, rand::random());
        self.attempt = self.attempt.saturating_add(1);
        self.set_state(ConnectionState::Reconnecting {
            attempt: self.attempt,
        });
        debug!(attempt = self.attempt, ?delay, "backing off before redial");

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return BackoffEnd::Redial,
                command = commands.recv() => match command {
                    Some(Command::Connect) => {}
                    Some(Command::Send { request, reply }) => self.enqueue(request, reply),
                    Some(Command::Disconnect { done }) => {
                        let _ = self.reject_queue(&RpcError::disconnected(
                            "connection closed before delivery",
                        ));
                        let _ = done.send(());
                        return BackoffEnd::Idle;
                    }
                    None => return BackoffEnd::Shutdown,
                },
            }
        }
    }

    /// Drains the queue, rejecting each registered id with `reason`.
    fn reject_queue(&mut self, reason: &RpcError) -> usize {
        let mut rejected = 0;
        while let Some(request) = self.queue.pop_front() {
            if self.registry.reject(&request.id, reason.clone()) {
                rejected += 1;
            }
        }
        rejected
    }

    /// Final teardown once the handle is gone.
    fn shutdown(&mut self) {
        let reason = RpcError::disconnected("client dropped");
        let rejected = self.reject_queue(&reason);
        let swept = self.registry.cancel_all(&reason);
        self.set_state(ConnectionState::Disconnected);
        debug!(rejected, swept, "driver shut down");
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send_replace(state);
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}

/// Sleeps until `deadline`, or forever when there is none.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Serializes and writes one frame, skipping frames that will not
/// serialize rather than killing the session over them.
async fn write_frame<T: Serialize>(sink: &mut WsSink, frame: &T) -> Result<(), WsError> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(err) => {
            error!(error = %err, "failed to serialize outbound frame, skipping");
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}
