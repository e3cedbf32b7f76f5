//! Envelope types shared by the WebSocket, HTTP, and stdio transports.
//!
//! Every frame on the wire is one of four shapes: a tool-invocation
//! [`Request`], a correlated [`Response`], a client [`Ping`], or a
//! server-pushed [`EventFrame`]. [`Envelope::decode`] classifies a raw
//! frame exactly once; everything downstream matches on the typed
//! variant instead of re-inspecting JSON keys.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Event name carried by heartbeat acknowledgements.
pub const EVENT_PONG: &str = "pong";

/// Event name carried by the unsolicited tool-catalog push.
pub const EVENT_SCHEMAS: &str = "schemas";

/// Placeholder id echoed on error responses when the offending frame's
/// own id could not be recovered.
pub const UNKNOWN_ID: &str = "unknown";

// ── Frame types ─────────────────────────────────────────────────────

/// A tool-invocation request.
///
/// Serialized as `{"id": ..., "name": ..., "parameters": {...}}` on
/// every transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-chosen correlation id, echoed verbatim on the response.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Tool arguments. Missing on the wire means empty.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Request {
    /// Creates a request with the given id, tool name, and parameters.
    pub fn new(id: impl Into<String>, name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parameters,
        }
    }
}

/// A correlated reply to a [`Request`].
///
/// Exactly one of `results` or `error` appears on the wire; frames
/// carrying both are rejected at decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// Successful completion carrying the tool's result payload.
    Success {
        /// Echo of the request id.
        id: String,
        /// Tool result payload.
        results: Value,
    },
    /// Failed completion carrying a structured error.
    Error {
        /// Echo of the request id, or [`UNKNOWN_ID`] when the request
        /// id could not be recovered from the offending frame.
        id: String,
        /// Structured error payload.
        error: ErrorBody,
    },
}

impl Response {
    /// Creates a success response.
    pub fn success(id: impl Into<String>, results: Value) -> Self {
        Self::Success {
            id: id.into(),
            results,
        }
    }

    /// Creates an error response from a code and message.
    pub fn error(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            id: id.into(),
            error: ErrorBody::new(code, message),
        }
    }

    /// Creates an error response from an already-built [`ErrorBody`].
    pub fn error_from(id: impl Into<String>, error: ErrorBody) -> Self {
        Self::Error {
            id: id.into(),
            error,
        }
    }

    /// The request id this response correlates to.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => id,
        }
    }

    /// Splits the response into its id and outcome.
    #[must_use]
    pub fn into_parts(self) -> (String, Result<Value, ErrorBody>) {
        match self {
            Self::Success { id, results } => (id, Ok(results)),
            Self::Error { id, error } => (id, Err(error)),
        }
    }
}

/// Structured error payload carried inside an error [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description of the failure.
    pub message: String,
    /// Machine-readable code from the taxonomy in [`crate::errors`].
    pub code: String,
    /// Optional executor-provided context, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    /// Creates an error body without details.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            details: None,
        }
    }

    /// Creates an error body carrying executor-provided details.
    pub fn with_details(code: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            details: Some(details),
        }
    }
}

/// A client liveness probe.
///
/// Serialized as `{"type": "ping", "data": {"timestamp": <epoch-ms>}}`.
/// Answered with a pong [`EventFrame`] without entering the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Ping {
    /// Sender's clock at transmission, epoch milliseconds.
    pub timestamp: i64,
}

impl Ping {
    /// Creates a ping stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            timestamp: epoch_millis(),
        }
    }
}

impl Serialize for Ping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Data {
            timestamp: i64,
        }
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "ping")?;
        map.serialize_entry(
            "data",
            &Data {
                timestamp: self.timestamp,
            },
        )?;
        map.end()
    }
}

/// A server-pushed notification outside the request/response cycle.
///
/// Serialized as `{"event": ..., "data": ..., "timestamp": ...}` with
/// absent fields omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name, e.g. [`EVENT_SCHEMAS`] or [`EVENT_PONG`].
    pub event: String,
    /// Event payload, when the event carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Server's clock at emission, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl EventFrame {
    /// Creates an event with a payload and no timestamp.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data: Some(data),
            timestamp: None,
        }
    }

    /// Heartbeat acknowledgement stamped with the current time.
    #[must_use]
    pub fn pong() -> Self {
        Self {
            event: EVENT_PONG.to_string(),
            data: None,
            timestamp: Some(epoch_millis()),
        }
    }

    /// Tool-catalog push carrying the full list of schemas.
    #[must_use]
    pub fn schemas(catalog: Value) -> Self {
        Self::new(EVENT_SCHEMAS, catalog)
    }
}

// ── Envelope ────────────────────────────────────────────────────────

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Tool invocation addressed to the dispatcher.
    Request(Request),
    /// Correlated reply routed to the registry.
    Response(Response),
    /// Liveness probe answered in the transport loop.
    Ping(Ping),
    /// Server push consumed by the client.
    Event(EventFrame),
}

impl Envelope {
    /// Classifies and decodes a raw frame.
    ///
    /// A frame is a request when it carries `name`, a response when it
    /// carries `results` or `error`, a ping when `type` is `"ping"`,
    /// and an event when it carries `event`. Frames matching more than
    /// one shape, or none, are rejected.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| DecodeError::Json(err.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(DecodeError::NotAnObject);
        };

        let is_request = object.contains_key("name");
        let is_response = object.contains_key("results") || object.contains_key("error");
        let is_heartbeat = object.contains_key("type");
        let is_event = object.contains_key("event");

        match (is_request, is_response, is_heartbeat, is_event) {
            (true, false, false, false) => decode_request(value),
            (false, true, false, false) => decode_response(object),
            (false, false, true, false) => decode_ping(object),
            (false, false, false, true) => decode_event(value),
            (false, false, false, false) => Err(DecodeError::UnrecognizedShape),
            _ => Err(DecodeError::AmbiguousShape),
        }
    }

    /// Serializes the envelope to its wire form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Best-effort recovery of the `id` field from a frame that failed to
/// decode, so an error response can still correlate.
///
/// Falls back to [`UNKNOWN_ID`] when the frame is not JSON or carries
/// no string `id`.
#[must_use]
pub fn recover_id(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .as_ref()
        .and_then(|value| value.get("id"))
        .and_then(Value::as_str)
        .map_or_else(|| UNKNOWN_ID.to_string(), str::to_string)
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Envelope {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Ping> for Envelope {
    fn from(ping: Ping) -> Self {
        Self::Ping(ping)
    }
}

impl From<EventFrame> for Envelope {
    fn from(event: EventFrame) -> Self {
        Self::Event(event)
    }
}

fn decode_request(value: Value) -> Result<Envelope, DecodeError> {
    let request: Request =
        serde_json::from_value(value).map_err(|err| DecodeError::Field(err.to_string()))?;
    Ok(Envelope::Request(request))
}

fn decode_response(object: &Map<String, Value>) -> Result<Envelope, DecodeError> {
    if object.contains_key("results") && object.contains_key("error") {
        return Err(DecodeError::BothResultsAndError);
    }
    let id = object
        .get("id")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingId)?
        .to_string();
    let response = if let Some(results) = object.get("results") {
        Response::Success {
            id,
            results: results.clone(),
        }
    } else {
        // contains_key("error") held during classification
        let error: ErrorBody = serde_json::from_value(object.get("error").cloned().unwrap_or(Value::Null))
            .map_err(|err| DecodeError::Field(err.to_string()))?;
        Response::Error { id, error }
    };
    Ok(Envelope::Response(response))
}

fn decode_ping(object: &Map<String, Value>) -> Result<Envelope, DecodeError> {
    let kind = object.get("type").and_then(Value::as_str).unwrap_or_default();
    if kind != "ping" {
        return Err(DecodeError::UnsupportedType(kind.to_string()));
    }
    let timestamp = object
        .get("data")
        .and_then(|data| data.get("timestamp"))
        .and_then(Value::as_i64)
        .ok_or(DecodeError::MalformedPing)?;
    Ok(Envelope::Ping(Ping { timestamp }))
}

fn decode_event(value: Value) -> Result<Envelope, DecodeError> {
    let event: EventFrame =
        serde_json::from_value(value).map_err(|err| DecodeError::Field(err.to_string()))?;
    Ok(Envelope::Event(event))
}

/// Why a raw frame failed to decode.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),
    /// The frame is valid JSON but not an object.
    #[error("envelope must be a JSON object")]
    NotAnObject,
    /// The frame mixes fields from more than one envelope shape.
    #[error("frame mixes request, response, heartbeat, or event fields")]
    AmbiguousShape,
    /// The frame matches no envelope shape at all.
    #[error("frame has no name, results, error, type, or event field")]
    UnrecognizedShape,
    /// A response carried both a results and an error field.
    #[error("response carries both results and error")]
    BothResultsAndError,
    /// A response omitted its id or carried a non-string id.
    #[error("missing or non-string id")]
    MissingId,
    /// A field inside an otherwise well-shaped frame failed to parse.
    #[error("{0}")]
    Field(String),
    /// A heartbeat frame carried a type other than `ping`.
    #[error("unsupported heartbeat type: {0:?}")]
    UnsupportedType(String),
    /// A ping frame omitted `data.timestamp`.
    #[error("ping frame missing data.timestamp")]
    MalformedPing,
}

/// Current time as epoch milliseconds.
fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    // ── Request ─────────────────────────────────────────────────────

    #[test]
    fn request_roundtrips_through_wire_form() {
        let request = Request::new("r1", "status", params(&[("verbose", json!(true))]));
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();
        assert_eq!(decoded, Envelope::Request(request));
    }

    #[test]
    fn request_serializes_empty_parameters_explicitly() {
        let request = Request::new("r1", "status", Map::new());
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"id": "r1", "name": "status", "parameters": {}}));
    }

    #[test]
    fn request_without_parameters_decodes_as_empty() {
        let envelope = Envelope::decode(r#"{"id": "r1", "name": "status"}"#).unwrap();
        let Envelope::Request(request) = envelope else {
            panic!("expected request");
        };
        assert!(request.parameters.is_empty());
    }

    #[test]
    fn request_missing_id_is_rejected() {
        let err = Envelope::decode(r#"{"name": "status"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Field(_)));
    }

    #[test]
    fn request_with_non_object_parameters_is_rejected() {
        let err = Envelope::decode(r#"{"id": "r1", "name": "status", "parameters": [1, 2]}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Field(_)));
    }

    // ── Response ────────────────────────────────────────────────────

    #[test]
    fn success_response_decodes() {
        let envelope =
            Envelope::decode(r#"{"id": "r1", "results": {"status": "ok"}}"#).unwrap();
        assert_eq!(
            envelope,
            Envelope::Response(Response::success("r1", json!({"status": "ok"})))
        );
    }

    #[test]
    fn error_response_decodes() {
        let envelope = Envelope::decode(
            r#"{"id": "r1", "error": {"message": "no such tool", "code": "UNSUPPORTED_TOOL"}}"#,
        )
        .unwrap();
        assert_eq!(
            envelope,
            Envelope::Response(Response::error("r1", "UNSUPPORTED_TOOL", "no such tool"))
        );
    }

    #[test]
    fn response_with_both_results_and_error_is_rejected() {
        let err = Envelope::decode(
            r#"{"id": "r1", "results": {}, "error": {"message": "x", "code": "Y"}}"#,
        )
        .unwrap_err();
        assert_eq!(err, DecodeError::BothResultsAndError);
    }

    #[test]
    fn response_missing_id_is_rejected() {
        let err = Envelope::decode(r#"{"results": {"status": "ok"}}"#).unwrap_err();
        assert_eq!(err, DecodeError::MissingId);
    }

    #[test]
    fn error_body_details_survive_the_roundtrip() {
        let response = Response::error_from(
            "r9",
            ErrorBody::with_details("TOOL_EXECUTION_ERROR", "boom", json!({"line": 3})),
        );
        let encoded = serde_json::to_string(&response).unwrap();
        let decoded = Envelope::decode(&encoded).unwrap();
        assert_eq!(decoded, Envelope::Response(response));
    }

    #[test]
    fn error_body_without_details_omits_the_field() {
        let encoded = serde_json::to_string(&Response::error("r1", "TIMEOUT", "late")).unwrap();
        assert!(!encoded.contains("details"));
    }

    #[test]
    fn response_into_parts_splits_outcome() {
        let (id, outcome) = Response::success("r1", json!(1)).into_parts();
        assert_eq!(id, "r1");
        assert_eq!(outcome, Ok(json!(1)));

        let (id, outcome) = Response::error("r2", "TIMEOUT", "late").into_parts();
        assert_eq!(id, "r2");
        assert_eq!(outcome.unwrap_err().code, "TIMEOUT");
    }

    // ── Ping and events ─────────────────────────────────────────────

    #[test]
    fn ping_decodes_from_wire_form() {
        let envelope =
            Envelope::decode(r#"{"type": "ping", "data": {"timestamp": 1712345678901}}"#).unwrap();
        assert_eq!(
            envelope,
            Envelope::Ping(Ping {
                timestamp: 1_712_345_678_901
            })
        );
    }

    #[test]
    fn ping_serializes_with_nested_timestamp() {
        let ping = Ping {
            timestamp: 1_712_345_678_901,
        };
        let value = serde_json::to_value(Envelope::Ping(ping)).unwrap();
        assert_eq!(
            value,
            json!({"type": "ping", "data": {"timestamp": 1_712_345_678_901_i64}})
        );
    }

    #[test]
    fn ping_without_timestamp_is_rejected() {
        let err = Envelope::decode(r#"{"type": "ping", "data": {}}"#).unwrap_err();
        assert_eq!(err, DecodeError::MalformedPing);
    }

    #[test]
    fn unknown_heartbeat_type_is_rejected() {
        let err = Envelope::decode(r#"{"type": "pause"}"#).unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedType("pause".to_string()));
    }

    #[test]
    fn pong_serializes_with_top_level_timestamp() {
        let value = serde_json::to_value(EventFrame::pong()).unwrap();
        assert_eq!(value["event"], "pong");
        assert!(value["timestamp"].is_i64());
        assert!(value.get("data").is_none());
    }

    #[test]
    fn schemas_event_carries_the_catalog() {
        let frame = EventFrame::schemas(json!([{"name": "status"}]));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["event"], "schemas");
        assert_eq!(value["data"], json!([{"name": "status"}]));
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn event_decodes_from_wire_form() {
        let envelope =
            Envelope::decode(r#"{"event": "schemas", "data": [{"name": "echo"}]}"#).unwrap();
        let Envelope::Event(event) = envelope else {
            panic!("expected event");
        };
        assert_eq!(event.event, EVENT_SCHEMAS);
        assert_eq!(event.data, Some(json!([{"name": "echo"}])));
    }

    // ── Classification edge cases ───────────────────────────────────

    #[test]
    fn invalid_json_is_rejected() {
        let err = Envelope::decode("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn non_object_frames_are_rejected() {
        assert_eq!(Envelope::decode("[1, 2]").unwrap_err(), DecodeError::NotAnObject);
        assert_eq!(Envelope::decode("42").unwrap_err(), DecodeError::NotAnObject);
    }

    #[test]
    fn frame_with_no_discriminating_field_is_rejected() {
        let err = Envelope::decode(r#"{"id": "r1"}"#).unwrap_err();
        assert_eq!(err, DecodeError::UnrecognizedShape);
    }

    #[test]
    fn frame_mixing_request_and_response_fields_is_rejected() {
        let err =
            Envelope::decode(r#"{"id": "r1", "name": "status", "results": {}}"#).unwrap_err();
        assert_eq!(err, DecodeError::AmbiguousShape);
    }

    #[test]
    fn frame_mixing_event_and_request_fields_is_rejected() {
        let err = Envelope::decode(r#"{"id": "r1", "name": "status", "event": "pong"}"#)
            .unwrap_err();
        assert_eq!(err, DecodeError::AmbiguousShape);
    }

    #[test]
    fn recover_id_reads_a_string_id_from_a_broken_frame() {
        assert_eq!(recover_id(r#"{"id": "r7", "bogus": true}"#), "r7");
    }

    #[test]
    fn recover_id_falls_back_for_missing_or_non_string_ids() {
        assert_eq!(recover_id(r#"{"bogus": true}"#), UNKNOWN_ID);
        assert_eq!(recover_id(r#"{"id": 42}"#), UNKNOWN_ID);
        assert_eq!(recover_id("not json"), UNKNOWN_ID);
    }

    // ── Wire format fixture tests ───────────────────────────────────
    //
    // Exact frames from the protocol description, pinned so codec
    // drift shows up as a test failure.

    #[test]
    fn wire_fixture_request() {
        let raw = r#"{"id": "req-1", "name": "status", "parameters": {}}"#;
        let Envelope::Request(request) = Envelope::decode(raw).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.id, "req-1");
        assert_eq!(request.name, "status");
        assert!(request.parameters.is_empty());
    }

    #[test]
    fn wire_fixture_success_response() {
        let response = Response::success("req-1", json!({"status": "ok"}));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"id": "req-1", "results": {"status": "ok"}}));
    }

    #[test]
    fn wire_fixture_error_response() {
        let response = Response::error("req-1", "TIMEOUT", "request timed out");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "req-1",
                "error": {"message": "request timed out", "code": "TIMEOUT"}
            })
        );
    }

    #[test]
    fn envelope_encode_matches_serde_output() {
        let envelope = Envelope::Response(Response::success("r1", json!(null)));
        assert_eq!(envelope.encode().unwrap(), r#"{"id":"r1","results":null}"#);
    }
}
