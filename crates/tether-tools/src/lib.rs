//! # tether-tools
//!
//! The tool layer: the [`Tool`] trait every executor implements, the
//! JSON Schema catalog pushed to clients, and the [`Dispatcher`] that
//! routes decoded requests onto executor tasks.

#![deny(unsafe_code)]

pub mod builtin;
pub mod dispatcher;
pub mod errors;
pub mod schema;
pub mod traits;

pub use dispatcher::Dispatcher;
pub use errors::ToolError;
pub use schema::{ParameterSchema, ToolSchema};
pub use traits::Tool;
