//! HTTP adapter: the envelope protocol without a socket.
//!
//! `POST /rpc` takes one frame per request body and returns one frame,
//! always with HTTP 200; protocol failures travel as error envelopes
//! rather than status codes, same as on the other transports.
//! `GET /schemas` serves the catalog the WebSocket transport pushes on
//! connect.

use axum::extract::State;
use axum::response::Json;
use serde_json::Value;
use tracing::{debug, error, warn};

use tether_rpc::RpcError;
use tether_rpc::envelope::{Envelope, EventFrame, Response, UNKNOWN_ID, recover_id};

use crate::server::AppState;

/// POST /rpc — one request envelope in, one response envelope out.
pub(crate) async fn rpc_handler(State(state): State<AppState>, body: String) -> Json<Envelope> {
    Json(process_frame(&body, &state).await)
}

/// GET /schemas — the tool catalog as a `schemas` event.
pub(crate) async fn schemas_handler(State(state): State<AppState>) -> Json<EventFrame> {
    Json(EventFrame::schemas(catalog_value(&state)))
}

async fn process_frame(text: &str, state: &AppState) -> Envelope {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "undecodable rpc body");
            let body = RpcError::from(err).to_error_body();
            return Response::error_from(recover_id(text), body).into();
        }
    };

    match envelope {
        Envelope::Request(request) => {
            debug!(id = %request.id, tool = %request.name, "dispatching http request");
            let deadline = state.config.request_timeout();
            state
                .dispatcher
                .dispatch_spawned(request, deadline)
                .await
                .into()
        }
        Envelope::Ping(_) => EventFrame::pong().into(),
        Envelope::Response(response) => {
            warn!(id = %response.id(), "response frame posted to /rpc");
            let err = RpcError::InvalidRequestFormat {
                message: "transport does not accept response frames".into(),
            };
            Response::error_from(response.id(), err.to_error_body()).into()
        }
        Envelope::Event(event) => {
            warn!(event = %event.event, "event frame posted to /rpc");
            let err = RpcError::InvalidRequestFormat {
                message: "transport does not accept event frames".into(),
            };
            Response::error_from(UNKNOWN_ID, err.to_error_body()).into()
        }
    }
}

fn catalog_value(state: &AppState) -> Value {
    serde_json::to_value(state.dispatcher.schemas()).unwrap_or_else(|err| {
        error!(error = %err, "failed to serialize tool catalog");
        Value::Array(Vec::new())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    use tether_tools::Dispatcher;
    use tether_tools::builtin::EchoTool;

    use crate::config::ServerConfig;
    use crate::server::Server;

    fn test_router() -> axum::Router {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(EchoTool));
        Server::new(ServerConfig::default(), dispatcher).router()
    }

    async fn post_rpc(body: &str) -> serde_json::Value {
        let req = HttpRequest::builder()
            .method("POST")
            .uri("/rpc")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn request_round_trips() {
        let value = post_rpc(r#"{"id": "h1", "name": "echo", "parameters": {"k": 1}}"#).await;
        assert_eq!(value["id"], "h1");
        assert_eq!(value["results"]["k"], 1);
    }

    #[tokio::test]
    async fn unknown_tool_reports_unsupported() {
        let value = post_rpc(r#"{"id": "h2", "name": "nope", "parameters": {}}"#).await;
        assert_eq!(value["id"], "h2");
        assert_eq!(value["error"]["code"], "UNSUPPORTED_TOOL");
    }

    #[tokio::test]
    async fn malformed_body_reports_invalid_format_in_band() {
        let value = post_rpc("{not json").await;
        assert_eq!(value["id"], "unknown");
        assert_eq!(value["error"]["code"], "INVALID_REQUEST_FORMAT");
    }

    #[tokio::test]
    async fn malformed_body_with_recoverable_id_still_correlates() {
        let value = post_rpc(r#"{"id": "h3", "bogus": true}"#).await;
        assert_eq!(value["id"], "h3");
        assert_eq!(value["error"]["code"], "INVALID_REQUEST_FORMAT");
    }

    #[tokio::test]
    async fn ping_gets_a_pong() {
        let value = post_rpc(r#"{"type": "ping", "data": {"timestamp": 1}}"#).await;
        assert_eq!(value["event"], "pong");
        assert!(value["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn response_frames_are_rejected() {
        let value = post_rpc(r#"{"id": "h4", "results": {}}"#).await;
        assert_eq!(value["id"], "h4");
        assert_eq!(value["error"]["code"], "INVALID_REQUEST_FORMAT");
    }

    #[tokio::test]
    async fn schemas_lists_registered_tools() {
        let req = HttpRequest::builder()
            .uri("/schemas")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["event"], "schemas");
        assert_eq!(value["data"][0]["name"], "echo");
    }
}
