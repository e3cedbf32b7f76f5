//! Tool schema types advertised to connected clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON Schema-compatible parameter definition for a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Top-level JSON Schema type.
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Property definitions (when type is `object`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Map<String, Value>>,
    /// Required property names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    /// Catch-all for additional JSON Schema keywords.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ParameterSchema {
    /// Schema for a tool that takes no parameters.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_type: "object".into(),
            properties: None,
            required: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Object schema with the given properties and required names.
    #[must_use]
    pub fn object(properties: serde_json::Map<String, Value>, required: &[&str]) -> Self {
        Self {
            schema_type: "object".into(),
            properties: Some(properties),
            required: if required.is_empty() {
                None
            } else {
                Some(required.iter().map(|name| (*name).to_string()).collect())
            },
            extra: serde_json::Map::new(),
        }
    }
}

/// A tool descriptor as it appears in the schema catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name (unique identifier matched against request names).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: ParameterSchema,
}

impl ToolSchema {
    /// Creates a descriptor.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
