//! WebSocket session lifecycle from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tether_core::SessionId;
use tether_rpc::envelope::{Envelope, EventFrame, Response, UNKNOWN_ID, recover_id};
use tether_rpc::RpcError;
use tether_tools::Dispatcher;

use crate::config::ServerConfig;

use super::connection::Session;
use super::heartbeat::{run_heartbeat, HeartbeatResult};
use super::manager::SessionManager;

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the session and pushes the `schemas` event before
///    anything else goes out
/// 2. Answers heartbeat pings in the loop, never through the dispatcher
/// 3. Spawns each request onto its own task so a slow tool cannot
///    stall other requests on the same socket
/// 4. Tears down when the watchdog fires, the socket drops, or the
///    server shuts down
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_session(
    ws: WebSocket,
    session_id: SessionId,
    dispatcher: Arc<Dispatcher>,
    manager: Arc<SessionManager>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<String>(config.send_buffer);
    let session = Arc::new(Session::new(session_id, send_tx));

    info!("client connected");
    manager.add(Arc::clone(&session)).await;

    // Writer owns the sink. A failed write means the socket is gone,
    // which cancels the whole session.
    let writer_session = Arc::clone(&session);
    let writer = tokio::spawn(async move {
        while let Some(text) = send_rx.recv().await {
            if let Err(err) = ws_tx.send(Message::Text(text.into())).await {
                warn!(session_id = %writer_session.id, error = %err, "socket write failed");
                writer_session.cancel_token().cancel();
                break;
            }
        }
    });

    push_schemas(&session, &dispatcher);

    // Liveness watchdog. A client that stops pinging gets closed.
    let watchdog_session = Arc::clone(&session);
    let interval = config.heartbeat_interval();
    let grace = config.heartbeat_timeout();
    let watchdog = tokio::spawn(async move {
        let cancel = watchdog_session.cancel_token().clone();
        let outcome = run_heartbeat(Arc::clone(&watchdog_session), interval, grace, cancel).await;
        if outcome == HeartbeatResult::TimedOut {
            warn!(session_id = %watchdog_session.id, "heartbeat lost, closing session");
            let _ = watchdog_session.begin_close();
            watchdog_session.cancel_token().cancel();
        }
    });

    let deadline = config.request_timeout();
    loop {
        tokio::select! {
            () = session.cancel_token().cancelled() => break,
            () = shutdown.cancelled() => {
                info!("server shutting down, closing session");
                break;
            }
            frame = ws_rx.next() => {
                let Some(Ok(message)) = frame else { break };
                let text = match message {
                    Message::Text(ref text) => text.to_string(),
                    Message::Binary(ref data) => match std::str::from_utf8(data) {
                        Ok(text) => text.to_string(),
                        Err(_) => {
                            warn!(len = data.len(), "received non-UTF8 binary frame");
                            let err = RpcError::InvalidRequestFormat {
                                message: "binary frame is not valid UTF-8".into(),
                            };
                            send_json(
                                &session,
                                &Response::error_from(UNKNOWN_ID, err.to_error_body()),
                                "error",
                            );
                            continue;
                        }
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        session.record_heartbeat();
                        continue;
                    }
                };
                handle_frame(&text, &session, &dispatcher, deadline);
            }
        }
    }

    // Close path. Only the session's own loop removes it from the
    // manager, so the entry cannot vanish while the loop still runs.
    let _ = session.begin_close();
    session.cancel_token().cancel();
    manager.remove(&session.id).await;
    session.mark_closed();
    watchdog.abort();
    writer.abort();
    info!(
        age = ?session.age(),
        dropped_frames = session.drop_count(),
        "client disconnected"
    );
}

/// Routes one inbound text frame.
fn handle_frame(
    text: &str,
    session: &Arc<Session>,
    dispatcher: &Arc<Dispatcher>,
    deadline: Duration,
) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "undecodable frame");
            let id = recover_id(text);
            let body = RpcError::from(err).to_error_body();
            send_json(session, &Response::error_from(id, body), "error");
            return;
        }
    };

    match envelope {
        Envelope::Request(request) => {
            debug!(id = %request.id, tool = %request.name, "dispatching request");
            let dispatcher = Arc::clone(dispatcher);
            let session = Arc::clone(session);
            drop(tokio::spawn(async move {
                let response = dispatcher.dispatch_spawned(request, deadline).await;
                send_json(&session, &response, "response");
            }));
        }
        Envelope::Ping(_) => {
            session.record_heartbeat();
            send_json(session, &EventFrame::pong(), "pong");
        }
        Envelope::Response(response) => {
            warn!(id = %response.id(), "client sent a response frame");
            let err = RpcError::InvalidRequestFormat {
                message: "server does not accept response frames".into(),
            };
            send_json(
                session,
                &Response::error_from(response.id(), err.to_error_body()),
                "error",
            );
        }
        Envelope::Event(event) => {
            warn!(event = %event.event, "client sent an event frame");
            let err = RpcError::InvalidRequestFormat {
                message: "server does not accept event frames".into(),
            };
            send_json(
                session,
                &Response::error_from(UNKNOWN_ID, err.to_error_body()),
                "error",
            );
        }
    }
}

/// Pushes the tool catalog as the first outbound frame.
fn push_schemas(session: &Session, dispatcher: &Dispatcher) {
    match serde_json::to_value(dispatcher.schemas()) {
        Ok(catalog) => send_json(session, &EventFrame::schemas(catalog), "schemas"),
        Err(err) => {
            error!(session_id = %session.id, error = %err, "failed to serialize tool catalog");
        }
    }
}

/// Serializes a frame and enqueues it, logging instead of blocking when
/// the session cannot take it.
fn send_json<T: Serialize>(session: &Session, frame: &T, what: &str) {
    match serde_json::to_string(frame) {
        Ok(text) => {
            if !session.send(text) {
                warn!(session_id = %session.id, what, "outbound frame not delivered");
            }
        }
        Err(err) => {
            error!(session_id = %session.id, what, error = %err, "failed to serialize frame");
        }
    }
}

#[cfg(test)]
mod tests {
    // Socket-level behavior needs a live WebSocket and is covered by
    // tests/integration.rs. These cover the frame-local helpers.

    use super::*;

    #[test]
    fn send_json_drops_frames_once_closed() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let session = Session::new(SessionId::new(), tx);
        let _ = session.begin_close();
        send_json(&session, &EventFrame::pong(), "pong");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_json_enqueues_while_open() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let session = Session::new(SessionId::new(), tx);
        send_json(&session, &EventFrame::pong(), "pong");
        let frame = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "pong");
    }
}
