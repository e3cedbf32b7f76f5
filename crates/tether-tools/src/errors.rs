//! Tool execution error types.

use serde_json::Value;
use thiserror::Error;

use tether_rpc::RpcError;

/// Errors a tool can surface from [`crate::traits::Tool::execute`].
///
/// Parameter problems map to the `INVALID_PARAMETERS` wire code,
/// everything else to `TOOL_EXECUTION_ERROR`.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Parameter validation failed before any work started.
    #[error("invalid parameters: {message}")]
    InvalidParameters {
        /// Description of the validation failure.
        message: String,
    },

    /// Parameter payload failed to deserialize.
    #[error("invalid parameters: {0}")]
    Json(#[from] serde_json::Error),

    /// The tool started executing and then failed.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
        /// Optional structured context surfaced to the caller.
        details: Option<Value>,
    },
}

impl ToolError {
    /// Validation failure with a message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    /// Execution failure without details.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            details: None,
        }
    }

    /// Execution failure carrying structured context.
    pub fn failed_with(message: impl Into<String>, details: Value) -> Self {
        Self::Failed {
            message: message.into(),
            details: Some(details),
        }
    }
}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        let message = err.to_string();
        match err {
            ToolError::InvalidParameters { .. } | ToolError::Json(_) => {
                Self::InvalidParameters { message }
            }
            ToolError::Failed { details, .. } => Self::ToolExecution { message, details },
        }
    }
}
