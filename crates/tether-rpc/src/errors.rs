//! Error taxonomy shared by every transport.
//!
//! Each variant of [`RpcError`] maps to exactly one wire code, and
//! [`RpcError::to_error_body`] produces the payload embedded in error
//! responses. Codes arriving off the wire map back through
//! [`RpcError::from_body`]; codes outside the taxonomy are passed
//! through verbatim as [`RpcError::Other`].

use serde_json::Value;

use crate::envelope::ErrorBody;

/// The inbound frame was not a well-formed request envelope.
pub const INVALID_REQUEST_FORMAT: &str = "INVALID_REQUEST_FORMAT";

/// The requested tool is not present in the dispatch table.
pub const UNSUPPORTED_TOOL: &str = "UNSUPPORTED_TOOL";

/// The tool rejected the supplied parameters.
pub const INVALID_PARAMETERS: &str = "INVALID_PARAMETERS";

/// The tool started executing and then failed (including panics).
pub const TOOL_EXECUTION_ERROR: &str = "TOOL_EXECUTION_ERROR";

/// No response arrived before the request's deadline.
pub const TIMEOUT: &str = "TIMEOUT";

/// A request reused an id that is still pending.
pub const DUPLICATE_ID: &str = "DUPLICATE_ID";

/// The connection dropped while the request was in flight.
pub const DISCONNECTED: &str = "DISCONNECTED";

/// The peer rejected the authentication handshake.
pub const AUTH_FAILED: &str = "AUTH_FAILED";

/// A structured protocol error with a stable wire code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// Inbound frame failed envelope validation.
    #[error("{message}")]
    InvalidRequestFormat {
        /// What was wrong with the frame.
        message: String,
    },
    /// Requested tool is not registered.
    #[error("{message}")]
    UnsupportedTool {
        /// Description naming the missing tool.
        message: String,
    },
    /// Tool rejected its parameters before executing.
    #[error("{message}")]
    InvalidParameters {
        /// What was wrong with the parameters.
        message: String,
    },
    /// Tool failed mid-execution.
    #[error("{message}")]
    ToolExecution {
        /// Failure description.
        message: String,
        /// Optional executor-provided context.
        details: Option<Value>,
    },
    /// Request deadline elapsed with no response.
    #[error("{message}")]
    Timeout {
        /// Which request timed out.
        message: String,
    },
    /// Request id collides with one still in flight.
    #[error("{message}")]
    DuplicateId {
        /// Which id collided.
        message: String,
    },
    /// Transport dropped while the request was pending.
    #[error("{message}")]
    Disconnected {
        /// Where in the lifecycle the drop happened.
        message: String,
    },
    /// Authentication handshake rejected.
    #[error("{message}")]
    AuthFailed {
        /// Rejection reason.
        message: String,
    },
    /// Error code outside the built-in taxonomy, passed through as-is.
    #[error("{message}")]
    Other {
        /// Verbatim wire code.
        code: String,
        /// Verbatim message.
        message: String,
        /// Verbatim details payload.
        details: Option<Value>,
    },
}

impl RpcError {
    /// Rejection for a tool name absent from the dispatch table.
    pub fn unsupported_tool(name: &str) -> Self {
        Self::UnsupportedTool {
            message: format!("unsupported tool: {name}"),
        }
    }

    /// Rejection for a request whose deadline elapsed.
    pub fn timeout_for(id: &str) -> Self {
        Self::Timeout {
            message: format!("request {id} received no response before its deadline"),
        }
    }

    /// Rejection for a request id that is already pending.
    pub fn duplicate(id: &str) -> Self {
        Self::DuplicateId {
            message: format!("request id {id} is already pending"),
        }
    }

    /// Rejection for a request caught by a connection loss.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::Disconnected {
            message: message.into(),
        }
    }

    /// The wire code for this error.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidRequestFormat { .. } => INVALID_REQUEST_FORMAT,
            Self::UnsupportedTool { .. } => UNSUPPORTED_TOOL,
            Self::InvalidParameters { .. } => INVALID_PARAMETERS,
            Self::ToolExecution { .. } => TOOL_EXECUTION_ERROR,
            Self::Timeout { .. } => TIMEOUT,
            Self::DuplicateId { .. } => DUPLICATE_ID,
            Self::Disconnected { .. } => DISCONNECTED,
            Self::AuthFailed { .. } => AUTH_FAILED,
            Self::Other { code, .. } => code,
        }
    }

    /// Converts to the wire payload embedded in error responses.
    #[must_use]
    pub fn to_error_body(&self) -> ErrorBody {
        let details = match self {
            Self::ToolExecution { details, .. } | Self::Other { details, .. } => details.clone(),
            _ => None,
        };
        ErrorBody {
            message: self.to_string(),
            code: self.code().to_string(),
            details,
        }
    }

    /// Maps a wire error payload back into the taxonomy.
    #[must_use]
    pub fn from_body(body: ErrorBody) -> Self {
        let ErrorBody {
            message,
            code,
            details,
        } = body;
        match code.as_str() {
            INVALID_REQUEST_FORMAT => Self::InvalidRequestFormat { message },
            UNSUPPORTED_TOOL => Self::UnsupportedTool { message },
            INVALID_PARAMETERS => Self::InvalidParameters { message },
            TOOL_EXECUTION_ERROR => Self::ToolExecution { message, details },
            TIMEOUT => Self::Timeout { message },
            DUPLICATE_ID => Self::DuplicateId { message },
            DISCONNECTED => Self::Disconnected { message },
            AUTH_FAILED => Self::AuthFailed { message },
            _ => Self::Other {
                code,
                message,
                details,
            },
        }
    }
}

impl From<crate::envelope::DecodeError> for RpcError {
    fn from(err: crate::envelope::DecodeError) -> Self {
        Self::InvalidRequestFormat {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::DecodeError;
    use serde_json::json;

    #[test]
    fn codes_match_their_variants() {
        assert_eq!(RpcError::unsupported_tool("x").code(), UNSUPPORTED_TOOL);
        assert_eq!(RpcError::timeout_for("r1").code(), TIMEOUT);
        assert_eq!(RpcError::duplicate("r1").code(), DUPLICATE_ID);
        assert_eq!(RpcError::disconnected("closed").code(), DISCONNECTED);
        assert_eq!(
            RpcError::InvalidRequestFormat {
                message: "bad".into()
            }
            .code(),
            INVALID_REQUEST_FORMAT
        );
        assert_eq!(
            RpcError::AuthFailed {
                message: "denied".into()
            }
            .code(),
            AUTH_FAILED
        );
    }

    #[test]
    fn display_uses_the_message() {
        let err = RpcError::unsupported_tool("screenshot");
        assert_eq!(err.to_string(), "unsupported tool: screenshot");
    }

    #[test]
    fn to_error_body_carries_code_and_message() {
        let body = RpcError::timeout_for("r1").to_error_body();
        assert_eq!(body.code, TIMEOUT);
        assert_eq!(body.message, "request r1 received no response before its deadline");
        assert!(body.details.is_none());
    }

    #[test]
    fn execution_details_survive_into_the_body() {
        let err = RpcError::ToolExecution {
            message: "boom".into(),
            details: Some(json!({"line": 3})),
        };
        assert_eq!(err.to_error_body().details, Some(json!({"line": 3})));
    }

    #[test]
    fn from_body_maps_known_codes() {
        let body = ErrorBody::new(TIMEOUT, "late");
        assert!(matches!(RpcError::from_body(body), RpcError::Timeout { .. }));

        let body = ErrorBody::new(DISCONNECTED, "gone");
        assert!(matches!(
            RpcError::from_body(body),
            RpcError::Disconnected { .. }
        ));
    }

    #[test]
    fn from_body_passes_unknown_codes_through() {
        let body = ErrorBody::with_details("RATE_LIMITED", "slow down", json!({"retryMs": 500}));
        let err = RpcError::from_body(body);
        assert_eq!(err.code(), "RATE_LIMITED");
        assert_eq!(err.to_string(), "slow down");
        assert_eq!(err.to_error_body().details, Some(json!({"retryMs": 500})));
    }

    #[test]
    fn body_roundtrip_preserves_code_and_message() {
        let original = RpcError::unsupported_tool("navigate");
        let recovered = RpcError::from_body(original.to_error_body());
        assert_eq!(recovered, original);
    }

    #[test]
    fn decode_errors_map_to_invalid_request_format() {
        let err: RpcError = DecodeError::MissingId.into();
        assert_eq!(err.code(), INVALID_REQUEST_FORMAT);
        assert_eq!(err.to_string(), "missing or non-string id");
    }
}
