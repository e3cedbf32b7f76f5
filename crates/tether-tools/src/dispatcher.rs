//! Dispatch table routing decoded requests to tool executors.
//!
//! The table is assembled at startup and read-only afterwards. Every
//! transport funnels requests through [`Dispatcher::dispatch_spawned`]
//! so a slow or panicking executor can never stall a connection loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinError;
use tracing::{debug, warn};

use tether_rpc::envelope::{Request, Response};
use tether_rpc::RpcError;

use crate::schema::ToolSchema;
use crate::traits::Tool;

/// Latency above which a completed dispatch is logged as slow.
const SLOW_DISPATCH: Duration = Duration::from_secs(1);

/// Maps tool names to their implementations.
pub struct Dispatcher {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Dispatcher {
    /// Creates an empty dispatch table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registers a tool under its own name.
    ///
    /// Replacing a name already in the table is logged; the table is
    /// meant to be fixed once serving starts.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool_name = %name, "replacing registered tool");
        } else {
            debug!(tool_name = %name, "tool registered");
        }
        let _ = self.tools.insert(name, tool);
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool with the given name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptor for a single tool.
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<ToolSchema> {
        self.tools.get(name).map(|tool| tool.schema())
    }

    /// The full catalog, sorted by tool name.
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|tool| tool.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// All registered names, sorted alphabetically.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Runs a request to completion on the calling task.
    ///
    /// Unknown names, parameter rejections, and execution failures all
    /// come back as error responses echoing the request id.
    pub async fn dispatch(&self, request: &Request) -> Response {
        let Some(tool) = self.get(&request.name) else {
            return Response::error_from(
                request.id.clone(),
                RpcError::unsupported_tool(&request.name).to_error_body(),
            );
        };
        match tool.execute(request.parameters.clone()).await {
            Ok(results) => Response::success(request.id.clone(), results),
            Err(err) => {
                Response::error_from(request.id.clone(), RpcError::from(err).to_error_body())
            }
        }
    }

    /// Runs a request on a fresh task under a deadline.
    ///
    /// A panicking executor becomes a `TOOL_EXECUTION_ERROR` response
    /// and an overrunning one a `TIMEOUT` response; either way the
    /// caller's loop keeps running.
    pub async fn dispatch_spawned(
        self: &Arc<Self>,
        request: Request,
        deadline: Duration,
    ) -> Response {
        let id = request.id.clone();
        let name = request.name.clone();
        let dispatcher = Arc::clone(self);
        let started = Instant::now();
        let mut task = tokio::spawn(async move { dispatcher.dispatch(&request).await });

        match tokio::time::timeout(deadline, &mut task).await {
            Ok(Ok(response)) => {
                let elapsed = started.elapsed();
                if elapsed >= SLOW_DISPATCH {
                    warn!(request_id = %id, tool_name = %name, elapsed = ?elapsed, "slow tool dispatch");
                }
                response
            }
            Ok(Err(join_err)) => {
                warn!(request_id = %id, tool_name = %name, "tool task aborted");
                Response::error_from(
                    id,
                    RpcError::ToolExecution {
                        message: describe_join_error(join_err),
                        details: None,
                    }
                    .to_error_body(),
                )
            }
            Err(_) => {
                task.abort();
                warn!(request_id = %id, tool_name = %name, deadline = ?deadline, "tool deadline elapsed");
                Response::error_from(
                    id,
                    RpcError::Timeout {
                        message: format!("tool {name} did not complete within {deadline:?}"),
                    }
                    .to_error_body(),
                )
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        let detail = payload
            .downcast_ref::<&str>()
            .map(|msg| (*msg).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        format!("tool panicked: {detail}")
    } else {
        "tool task cancelled".to_string()
    }
}
