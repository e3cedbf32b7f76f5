//! The trait every invocable tool implements.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::ToolError;
use crate::schema::ToolSchema;

/// An executor behind a name in the dispatch table.
///
/// Each tool provides:
/// - **Schema** via [`schema()`](Tool::schema), pushed to clients in the
///   catalog event
/// - **Execution** via [`execute()`](Tool::execute), invoked with the
///   request's parameter object
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, the exact string matched against request `name` fields.
    fn name(&self) -> &str;

    /// Descriptor advertised to connected clients.
    fn schema(&self) -> ToolSchema;

    /// Executes with the request's parameter object and returns the
    /// result payload echoed back inside the success response.
    async fn execute(&self, parameters: Map<String, Value>) -> Result<Value, ToolError>;
}
