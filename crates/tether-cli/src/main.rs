//! # tether-cli
//!
//! The `tether` binary: serves the bridge over HTTP/WebSocket, speaks
//! the same protocol over stdio for subprocess embedding, and fires
//! one-shot tool calls from the command line.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tether_client::config::DEFAULT_URL;
use tether_client::{Client, ClientConfig};
use tether_server::stdio::run_stdio;
use tether_server::{Server, ServerConfig};
use tether_tools::builtin::{EchoTool, StatusTool};
use tether_tools::Dispatcher;

/// Tether tool-invocation bridge.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Tool-invocation bridge over WebSocket, HTTP, and stdio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the bridge over HTTP and WebSocket.
    Serve {
        /// Path to a JSON config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Host to bind (overrides config and environment).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind, 0 for auto-assign (overrides config and environment).
        #[arg(long)]
        port: Option<u16>,

        /// Token required at the WebSocket upgrade (overrides config and environment).
        #[arg(long)]
        auth_token: Option<String>,
    },

    /// Speak the protocol over stdin and stdout.
    ///
    /// Stdout carries frames, so all logging goes to stderr.
    Stdio {
        /// Path to a JSON config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Invoke one tool and print its results as JSON.
    Call {
        /// Tool to invoke.
        name: String,

        /// Tool parameters as a JSON object.
        #[arg(default_value = "{}")]
        parameters: String,

        /// WebSocket URL of the server.
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,

        /// Admission token, appended to the URL query.
        #[arg(long)]
        token: Option<String>,

        /// Seconds to wait for the connection and the response.
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
}

/// Dispatch table for the stock binary: `status` and `echo`.
fn builtin_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(Arc::new(StatusTool::new()));
    dispatcher.register(Arc::new(EchoTool));
    dispatcher
}

fn init_tracing(to_stderr: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

fn url_with_token(url: String, token: Option<String>) -> String {
    match token {
        Some(token) => format!("{url}?token={token}"),
        None => url,
    }
}

async fn cmd_serve(
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    auth_token: Option<String>,
) -> Result<()> {
    let mut config = ServerConfig::load_or_default(config.as_deref())
        .context("Failed to load config")?
        .apply_env_overrides();
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(token) = auth_token {
        config.auth_token = Some(token);
    }

    let server = Server::new(config, builtin_dispatcher());
    let handle = server.listen().await.context("Failed to bind server")?;
    let tool_count = server.dispatcher().schemas().len();
    tracing::info!(
        "Tether listening on http://{} ({tool_count} tools registered)",
        handle.addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown();
    handle.stopped().await;
    Ok(())
}

async fn cmd_stdio(config: Option<PathBuf>) -> Result<()> {
    let config = ServerConfig::load_or_default(config.as_deref())
        .context("Failed to load config")?
        .apply_env_overrides();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    }));

    run_stdio(Arc::new(builtin_dispatcher()), Arc::new(config), shutdown)
        .await
        .context("Stdio transport failed")?;
    Ok(())
}

async fn cmd_call(
    name: String,
    parameters: String,
    url: String,
    token: Option<String>,
    timeout_secs: u64,
) -> Result<()> {
    let parameters: Map<String, Value> =
        serde_json::from_str(&parameters).context("Parameters must be a JSON object")?;

    let config = ClientConfig {
        request_timeout_secs: timeout_secs,
        ..ClientConfig::for_url(url_with_token(url, token))
    };
    let client = Client::new(config);
    client.connect().await;
    timeout(
        Duration::from_secs(timeout_secs),
        client.wait_until_connected(),
    )
    .await
    .context("Timed out reaching the server")?
    .context("Client closed before connecting")?;

    let result = client.call(name, parameters).await;
    client.disconnect().await;

    let results = result.context("Call failed")?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            auth_token,
        } => {
            init_tracing(false);
            cmd_serve(config, host, port, auth_token).await
        }
        Command::Stdio { config } => {
            init_tracing(true);
            cmd_stdio(config).await
        }
        Command::Call {
            name,
            parameters,
            url,
            token,
            timeout_secs,
        } => {
            init_tracing(true);
            cmd_call(name, parameters, url, token, timeout_secs).await
        }
    }
}
