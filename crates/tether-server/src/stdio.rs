//! Stdio adapter: line-delimited frames for subprocess embedding.
//!
//! One frame per line on stdin, one frame per line on stdout. The
//! catalog push, concurrent dispatch, and in-band error reporting all
//! match the WebSocket transport; stdout is reserved for frames, so
//! anything running this adapter must log to stderr.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tether_rpc::RpcError;
use tether_rpc::envelope::{Envelope, EventFrame, Response, UNKNOWN_ID, recover_id};
use tether_tools::Dispatcher;

use crate::config::ServerConfig;

/// Serves the envelope protocol over the process's stdin and stdout.
///
/// Returns when stdin reaches EOF or `shutdown` fires; in-flight
/// requests finish writing their responses first. Stdin reads run on a
/// blocking thread, so a shutdown signal closes the transport without
/// waiting for the next line.
pub async fn run_stdio(
    dispatcher: Arc<Dispatcher>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    serve_lines(
        tokio::io::stdin(),
        tokio::io::stdout(),
        dispatcher,
        config,
        shutdown,
    )
    .await
}

/// Serves the envelope protocol over an arbitrary byte stream pair.
pub async fn serve_lines<R, W>(
    reader: R,
    writer: W,
    dispatcher: Arc<Dispatcher>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel::<String>(config.send_buffer);
    let writer_task = tokio::spawn(write_lines(writer, out_rx));

    // Catalog first, same as the WebSocket transport.
    enqueue(&out_tx, &EventFrame::schemas(catalog_value(&dispatcher))).await;

    let mut lines = BufReader::new(reader).lines();
    let mut inflight = JoinSet::new();
    let deadline = config.request_timeout();
    let mut read_error = None;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("shutdown requested, closing stdio transport");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    handle_line(line, &dispatcher, &out_tx, &mut inflight, deadline).await;
                }
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(err) => {
                    read_error = Some(err);
                    break;
                }
            }
        }
    }

    // Drain in-flight requests so their responses still go out.
    while inflight.join_next().await.is_some() {}
    drop(out_tx);
    let _ = writer_task.await;

    match read_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Routes one inbound line.
async fn handle_line(
    line: &str,
    dispatcher: &Arc<Dispatcher>,
    out_tx: &mpsc::Sender<String>,
    inflight: &mut JoinSet<()>,
    deadline: Duration,
) {
    let envelope = match Envelope::decode(line) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "undecodable line");
            let body = RpcError::from(err).to_error_body();
            enqueue(out_tx, &Response::error_from(recover_id(line), body)).await;
            return;
        }
    };

    match envelope {
        Envelope::Request(request) => {
            debug!(id = %request.id, tool = %request.name, "dispatching stdio request");
            let dispatcher = Arc::clone(dispatcher);
            let out_tx = out_tx.clone();
            let _ = inflight.spawn(async move {
                let response = dispatcher.dispatch_spawned(request, deadline).await;
                enqueue(&out_tx, &response).await;
            });
        }
        Envelope::Ping(_) => enqueue(out_tx, &EventFrame::pong()).await,
        Envelope::Response(response) => {
            warn!(id = %response.id(), "client sent a response frame");
            let err = RpcError::InvalidRequestFormat {
                message: "transport does not accept response frames".into(),
            };
            enqueue(
                out_tx,
                &Response::error_from(response.id(), err.to_error_body()),
            )
            .await;
        }
        Envelope::Event(event) => {
            warn!(event = %event.event, "client sent an event frame");
            let err = RpcError::InvalidRequestFormat {
                message: "transport does not accept event frames".into(),
            };
            enqueue(out_tx, &Response::error_from(UNKNOWN_ID, err.to_error_body())).await;
        }
    }
}

/// Writes queued frames one per line, flushing after each.
async fn write_lines<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        if let Err(err) = write_frame(&mut writer, &line).await {
            warn!(error = %err, "stdout write failed, stopping writer");
            break;
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn enqueue<T: Serialize>(out_tx: &mpsc::Sender<String>, frame: &T) {
    match serde_json::to_string(frame) {
        Ok(text) => {
            if out_tx.send(text).await.is_err() {
                warn!("stdout writer gone, dropping frame");
            }
        }
        Err(err) => error!(error = %err, "failed to serialize frame"),
    }
}

fn catalog_value(dispatcher: &Dispatcher) -> Value {
    serde_json::to_value(dispatcher.schemas()).unwrap_or_else(|err| {
        error!(error = %err, "failed to serialize tool catalog");
        Value::Array(Vec::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, DuplexStream, Lines, duplex};
    use tokio::task::JoinHandle;

    use tether_tools::builtin::EchoTool;

    struct Harness {
        input: Option<DuplexStream>,
        output: Lines<BufReader<DuplexStream>>,
        shutdown: CancellationToken,
        task: JoinHandle<io::Result<()>>,
    }

    fn start() -> Harness {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(EchoTool));

        let (input, input_rx) = duplex(4096);
        let (output_tx, output_rx) = duplex(4096);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve_lines(
            input_rx,
            output_tx,
            Arc::new(dispatcher),
            Arc::new(ServerConfig::default()),
            shutdown.clone(),
        ));

        Harness {
            input: Some(input),
            output: BufReader::new(output_rx).lines(),
            shutdown,
            task,
        }
    }

    async fn next_json(harness: &mut Harness) -> serde_json::Value {
        let line = harness.output.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn send_line(harness: &mut Harness, line: &str) {
        let input = harness.input.as_mut().unwrap();
        input.write_all(line.as_bytes()).await.unwrap();
        input.write_all(b"\n").await.unwrap();
    }

    #[tokio::test]
    async fn schemas_line_arrives_first() {
        let mut harness = start();
        let value = next_json(&mut harness).await;
        assert_eq!(value["event"], "schemas");
        assert_eq!(value["data"][0]["name"], "echo");
    }

    #[tokio::test]
    async fn request_line_gets_a_response_line() {
        let mut harness = start();
        let _ = next_json(&mut harness).await;

        send_line(&mut harness, r#"{"id": "s1", "name": "echo", "parameters": {"k": 1}}"#).await;
        let value = next_json(&mut harness).await;
        assert_eq!(value["id"], "s1");
        assert_eq!(value["results"]["k"], 1);
    }

    #[tokio::test]
    async fn ping_line_gets_a_pong() {
        let mut harness = start();
        let _ = next_json(&mut harness).await;

        send_line(&mut harness, r#"{"type": "ping", "data": {"timestamp": 5}}"#).await;
        let value = next_json(&mut harness).await;
        assert_eq!(value["event"], "pong");
    }

    #[tokio::test]
    async fn malformed_line_reports_error_and_transport_survives() {
        let mut harness = start();
        let _ = next_json(&mut harness).await;

        send_line(&mut harness, "{not json").await;
        let value = next_json(&mut harness).await;
        assert_eq!(value["id"], "unknown");
        assert_eq!(value["error"]["code"], "INVALID_REQUEST_FORMAT");

        send_line(&mut harness, r#"{"id": "s2", "name": "echo", "parameters": {}}"#).await;
        let value = next_json(&mut harness).await;
        assert_eq!(value["id"], "s2");
    }

    #[tokio::test]
    async fn empty_lines_are_skipped() {
        let mut harness = start();
        let _ = next_json(&mut harness).await;

        send_line(&mut harness, "").await;
        send_line(&mut harness, "   ").await;
        send_line(&mut harness, r#"{"id": "s3", "name": "echo", "parameters": {}}"#).await;
        let value = next_json(&mut harness).await;
        assert_eq!(value["id"], "s3");
    }

    #[tokio::test]
    async fn eof_drains_inflight_and_exits_cleanly() {
        let mut harness = start();
        let _ = next_json(&mut harness).await;

        send_line(&mut harness, r#"{"id": "s4", "name": "echo", "parameters": {}}"#).await;
        drop(harness.input.take());

        let value = next_json(&mut harness).await;
        assert_eq!(value["id"], "s4");
        harness.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_the_transport() {
        let harness = start();
        harness.shutdown.cancel();
        harness.task.await.unwrap().unwrap();
    }
}
