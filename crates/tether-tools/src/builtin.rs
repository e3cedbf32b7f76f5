//! Built-in tools registered by the stock server binary.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::errors::ToolError;
use crate::schema::{ParameterSchema, ToolSchema};
use crate::traits::Tool;

/// Reports server identity and uptime.
pub struct StatusTool {
    started_at: Instant,
}

impl StatusTool {
    /// Creates a status tool anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

impl Default for StatusTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for StatusTool {
    fn name(&self) -> &str {
        "status"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "status",
            "Report server version and uptime",
            ParameterSchema::empty(),
        )
    }

    async fn execute(&self, _parameters: Map<String, Value>) -> Result<Value, ToolError> {
        Ok(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSecs": self.started_at.elapsed().as_secs(),
            "timestamp": chrono::Utc::now().timestamp_millis(),
        }))
    }
}

/// Echoes its parameter object back as the result payload.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn schema(&self) -> ToolSchema {
        let mut extra = serde_json::Map::new();
        let _ = extra.insert("additionalProperties".to_string(), json!(true));
        ToolSchema::new(
            "echo",
            "Echo the parameter object back unchanged",
            ParameterSchema {
                schema_type: "object".into(),
                properties: None,
                required: None,
                extra,
            },
        )
    }

    async fn execute(&self, parameters: Map<String, Value>) -> Result<Value, ToolError> {
        Ok(Value::Object(parameters))
    }
}
