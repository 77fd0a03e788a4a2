//! Engine worker: owns the TCP connection to the debug engine.

use std::sync::Arc;

use bytes::Bytes;
use nbdebug_core::{DebugEvent, EventStore, SessionState, protocol};
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
};

use crate::{
    TransportError,
    channel::{ControlMessage, HeaderMessage, WorkerEndpoints},
    framing::FrameDecoder,
};

/// A forwarded request waiting for the engine's response.
struct Pending {
    seq: Option<i64>,
    reply: oneshot::Sender<Result<Bytes, TransportError>>,
}

impl Pending {
    fn matches(&self, response: &Value) -> bool {
        match self.seq {
            Some(seq) => response.get("request_seq").and_then(Value::as_i64) == Some(seq),
            None => true,
        }
    }
}

/// Resolves once the caller of the pending request stops waiting.
async fn abandoned(pending: &mut Option<Pending>) {
    match pending {
        Some(pending) => pending.reply.closed().await,
        None => std::future::pending().await,
    }
}

/// Background worker bridging the proxy channels and the engine socket.
///
/// Engine events update the session state (the stopped-thread set) and are
/// published to the host with the header of the request in flight.
pub struct EngineWorker {
    engine_endpoint: String,
    endpoints: WorkerEndpoints,
    state: Arc<SessionState>,
    events: Arc<EventStore>,
    parent_header: Value,
    pending: Option<Pending>,
}

/// Owned handle on a running worker.
///
/// Dropping the handle without calling [`WorkerHandle::stop`] still ends the
/// worker once the proxy endpoints are dropped, but does not wait for it.
pub struct WorkerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to exit and wait until it has.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("Engine worker ended abnormally: {e}");
        }
    }

    /// Whether the worker task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl EngineWorker {
    /// Spawn a worker connecting to `engine_endpoint` (`host:port`).
    ///
    /// The worker acknowledges the primary channel's handshake only once the
    /// engine connection is up. If the connection fails, it exits and the
    /// handshake reports the worker as gone.
    #[must_use]
    pub fn spawn(
        engine_endpoint: impl Into<String>,
        endpoints: WorkerEndpoints,
        state: Arc<SessionState>,
        events: Arc<EventStore>,
    ) -> WorkerHandle {
        let worker = Self {
            engine_endpoint: engine_endpoint.into(),
            endpoints,
            state,
            events,
            parent_header: Value::Null,
            pending: None,
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let endpoint = worker.engine_endpoint.clone();
            match worker.run(shutdown_rx).await {
                Ok(()) => tracing::debug!(%endpoint, "Engine worker exited"),
                Err(e) => tracing::error!(%endpoint, "Engine worker failed: {e}"),
            }
        });

        WorkerHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    async fn run(mut self, shutdown_rx: oneshot::Receiver<()>) -> Result<(), TransportError> {
        let stream = TcpStream::connect(&self.engine_endpoint)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: self.engine_endpoint.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        tracing::info!(endpoint = %self.engine_endpoint, "Connected to debug engine");

        let (reader, writer) = stream.into_split();
        let result = self.serve(reader, writer, shutdown_rx).await;

        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(TransportError::WorkerGone));
        }
        result
    }

    async fn serve(
        &mut self,
        mut reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), TransportError> {
        let mut decoder = FrameDecoder::new();

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                Some(header) = self.endpoints.header_rx.recv() => {
                    self.on_header(header);
                }
                () = abandoned(&mut self.pending), if self.pending.is_some() => {
                    if let Some(pending) = self.pending.take() {
                        tracing::warn!(seq = ?pending.seq, "Caller gave up waiting for the engine");
                    }
                }
                control = self.endpoints.control_rx.recv(), if self.pending.is_none() => {
                    let Some(control) = control else {
                        // Proxy endpoints were unbound.
                        break;
                    };
                    self.on_control(control, &mut writer).await?;
                }
                read = reader.read_buf(decoder.buffer_mut()) => {
                    if read? == 0 {
                        tracing::info!("Debug engine closed the connection");
                        break;
                    }
                    while let Some(frame) = decoder.next_frame()? {
                        self.on_engine_frame(frame);
                    }
                }
            }
        }

        let _ = writer.shutdown().await;
        Ok(())
    }

    fn on_header(&mut self, header: HeaderMessage) {
        self.parent_header = header.header;
        let _ = header.ack.send(());
    }

    async fn on_control(
        &mut self,
        control: ControlMessage,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(), TransportError> {
        match control {
            ControlMessage::Ready { ack } => {
                let _ = ack.send(());
            }
            ControlMessage::Forward { seq, frame, reply } => {
                if reply.is_closed() {
                    tracing::debug!(?seq, "Skipping request abandoned before it was sent");
                    return Ok(());
                }
                tracing::debug!(?seq, bytes = frame.len(), "Forwarding request to engine");
                if let Err(e) = writer.write_all(&frame).await {
                    let _ = reply.send(Err(TransportError::WorkerGone));
                    return Err(e.into());
                }
                self.pending = Some(Pending { seq, reply });
            }
        }
        Ok(())
    }

    fn on_engine_frame(&mut self, frame: Bytes) {
        let message: Value = match serde_json::from_slice(&frame) {
            Ok(message) => message,
            Err(e) => {
                // Let the request flow surface the parse failure if it is waiting.
                if let Some(pending) = self.pending.take() {
                    let _ = pending.reply.send(Ok(frame));
                } else {
                    tracing::warn!("Dropping unparseable engine message: {e}");
                }
                return;
            }
        };

        if protocol::is_event(&message) {
            self.state.handle_event(&message);
            self.events.push(DebugEvent {
                parent_header: self.parent_header.clone(),
                content: message,
            });
        } else if protocol::is_response(&message) {
            match self.pending.take() {
                Some(pending) if pending.matches(&message) => {
                    let _ = pending.reply.send(Ok(frame));
                }
                other => {
                    self.pending = other;
                    tracing::warn!(
                        request_seq = ?message.get("request_seq"),
                        "Dropping engine response with no matching request"
                    );
                }
            }
        } else {
            tracing::debug!(
                kind = ?message.get("type"),
                "Ignoring engine message"
            );
        }
    }
}
