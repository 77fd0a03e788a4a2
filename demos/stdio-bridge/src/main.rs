//! Debug bridge speaking DAP over stdin/stdout.
//!
//! Run with: NBDEBUG_ENGINE_PORT=5678 cargo run -p stdio-bridge
//!
//! Requests are read as Content-Length framed JSON from stdin, either bare
//! DAP requests or `{"header": ..., "content": ...}` envelopes. Replies and
//! engine events are written to stdout in the same framing. The engine must
//! already listen on the given port; this bridge has no interpreter to start
//! it from.

use std::{env, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use nbdebug_core::{
    BridgeConfig, ExecutionReply, GlobalVariable, Interpreter, InterpreterError, protocol,
};
use nbdebug_session::Debugger;
use nbdebug_transport::{FrameDecoder, encode_frame};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ENGINE_PORT_VAR: &str = "NBDEBUG_ENGINE_PORT";

/// Interpreter stand-in: the engine is started out of band.
struct DetachedInterpreter;

#[async_trait]
impl Interpreter for DetachedInterpreter {
    async fn execute(&self, code: &str) -> Result<ExecutionReply, InterpreterError> {
        tracing::debug!(%code, "Skipping engine bring-up");
        Ok(ExecutionReply::ok())
    }

    fn globals(&self) -> Vec<GlobalVariable> {
        Vec::new()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port: u16 = env::var(ENGINE_PORT_VAR)
        .with_context(|| format!("{ENGINE_PORT_VAR} is not set"))?
        .parse()
        .with_context(|| format!("{ENGINE_PORT_VAR} is not a port number"))?;

    let config = BridgeConfig::default().with_engine_port(port);
    let mut debugger = Debugger::new(config, Arc::new(DetachedInterpreter))?;
    tracing::info!(engine = %debugger.endpoint().address(), "Bridge ready");

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(write_stdout(out_rx));

    let mut events = debugger.events().history_plus_stream();
    let event_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if event_tx.send(event.content).is_err() {
                break;
            }
        }
    });

    let result = read_requests(&mut debugger, &out_tx).await;

    debugger.stop().await;
    forwarder.abort();
    drop(out_tx);
    writer.await??;
    result
}

async fn read_requests(
    debugger: &mut Debugger,
    out_tx: &mpsc::UnboundedSender<Value>,
) -> anyhow::Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut decoder = FrameDecoder::new();

    loop {
        while let Some(frame) = decoder.next_frame()? {
            let incoming: Value = match serde_json::from_slice(&frame) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Ignoring malformed request: {e}");
                    continue;
                }
            };
            let (header, message) = split_envelope(incoming);

            let reply = match debugger.process_request(&header, &message).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(command = protocol::command(&message), "Request failed: {e}");
                    protocol::failure(&message, &e.to_string())
                }
            };
            if out_tx.send(reply).is_err() {
                return Ok(());
            }
        }

        if stdin.read_buf(decoder.buffer_mut()).await? == 0 {
            tracing::info!("stdin closed");
            return Ok(());
        }
    }
}

fn split_envelope(incoming: Value) -> (Value, Value) {
    match incoming {
        Value::Object(mut map) if map.contains_key("content") => {
            let header = map.remove("header").unwrap_or_else(|| json!({}));
            let content = map.remove("content").unwrap_or_else(|| json!({}));
            (header, content)
        }
        bare => (json!({}), bare),
    }
}

async fn write_stdout(mut rx: mpsc::UnboundedReceiver<Value>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
        // Empty replies are requests the bridge had nothing to answer.
        if message.as_object().is_some_and(serde_json::Map::is_empty) {
            continue;
        }
        let payload = serde_json::to_vec(&message)?;
        stdout.write_all(&encode_frame(&payload)).await?;
        stdout.flush().await?;
    }
    Ok(())
}
