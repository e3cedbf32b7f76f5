//! # tether-server
//!
//! The serving side of Tether: WebSocket sessions with liveness
//! monitoring and catalog push, an HTTP adapter exposing the same
//! envelope semantics on `POST /rpc`, and a stdio adapter speaking
//! line-delimited frames for subprocess embedding. All three route
//! through one shared dispatch table.

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
mod http;
pub mod server;
pub mod stdio;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, Server, ServerError, ServerHandle};
