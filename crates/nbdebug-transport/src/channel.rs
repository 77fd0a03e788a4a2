//! Local proxy channels between the request flow and the engine worker.
//!
//! Two point-to-point channels connect the two sides:
//! - the primary channel carries framed DAP requests and returns exactly one
//!   reply per request;
//! - the sync channel carries the host request header and returns a bare
//!   acknowledgement. It has no debug semantics: awaiting the ack is a
//!   barrier that keeps the host's execution channel and this one in issue
//!   order.
//!
//! Binding creates both channels; dropping [`ProxyEndpoints`] unbinds them.

use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::{TransportError, framing};

/// Message on the primary channel.
#[derive(Debug)]
pub enum ControlMessage {
    /// Startup handshake, acknowledged once the engine is connected.
    Ready { ack: oneshot::Sender<()> },
    /// A framed request to write to the engine.
    Forward {
        /// `seq` of the request, used to match the engine's response.
        seq: Option<i64>,
        /// Wire bytes, already framed.
        frame: Bytes,
        /// Receives the raw JSON of the engine's response.
        reply: oneshot::Sender<Result<Bytes, TransportError>>,
    },
}

/// Message on the sync channel.
#[derive(Debug)]
pub struct HeaderMessage {
    /// Header of the host request being processed.
    pub header: Value,
    /// Acknowledged as soon as the worker has taken the header.
    pub ack: oneshot::Sender<()>,
}

/// Request-flow side of the proxy channels.
#[derive(Debug)]
pub struct ProxyEndpoints {
    control_name: String,
    header_name: String,
    control_tx: mpsc::Sender<ControlMessage>,
    header_tx: mpsc::Sender<HeaderMessage>,
    timeout: Option<Duration>,
}

/// Worker side of the proxy channels.
#[derive(Debug)]
pub struct WorkerEndpoints {
    pub(crate) control_rx: mpsc::Receiver<ControlMessage>,
    pub(crate) header_rx: mpsc::Receiver<HeaderMessage>,
}

/// Bind the primary and sync channels under the given endpoint names.
///
/// `timeout` bounds every wait for an acknowledgement or reply.
#[must_use]
pub fn bind(
    control_name: impl Into<String>,
    header_name: impl Into<String>,
    timeout: Option<Duration>,
) -> (ProxyEndpoints, WorkerEndpoints) {
    // One outstanding message per channel; the request flow never pipelines.
    let (control_tx, control_rx) = mpsc::channel(1);
    let (header_tx, header_rx) = mpsc::channel(1);

    let proxy = ProxyEndpoints {
        control_name: control_name.into(),
        header_name: header_name.into(),
        control_tx,
        header_tx,
        timeout,
    };
    tracing::debug!(
        control = %proxy.control_name,
        header = %proxy.header_name,
        "bound proxy endpoints"
    );

    (
        proxy,
        WorkerEndpoints {
            control_rx,
            header_rx,
        },
    )
}

impl ProxyEndpoints {
    /// Name of the primary channel endpoint.
    #[must_use]
    pub fn control_name(&self) -> &str {
        &self.control_name
    }

    /// Name of the sync channel endpoint.
    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Confirm the worker is up and connected to the engine.
    ///
    /// # Errors
    /// Returns error if the worker exited (e.g. could not reach the engine)
    /// or did not answer in time.
    pub async fn handshake(&self) -> Result<(), TransportError> {
        let (ack, ack_rx) = oneshot::channel();
        self.exchange(&self.control_tx, ControlMessage::Ready { ack }, ack_rx)
            .await
    }

    /// Pass the host request header through the sync channel and wait for
    /// the acknowledgement.
    ///
    /// # Errors
    /// Returns error if the worker is gone or did not answer in time.
    pub async fn sync_header(&self, header: &Value) -> Result<(), TransportError> {
        let (ack, ack_rx) = oneshot::channel();
        let message = HeaderMessage {
            header: header.clone(),
            ack,
        };
        self.exchange(&self.header_tx, message, ack_rx).await
    }

    /// Frame `message`, send it to the engine and wait for its reply.
    ///
    /// Returns the raw JSON bytes of the engine's response. The timeout
    /// covers queueing behind the worker as well as the engine's answer; a
    /// request given up on is never written to the engine afterwards.
    ///
    /// # Errors
    /// Returns error if the message cannot be serialized, the worker is
    /// gone, the engine connection failed, or the reply timed out.
    pub async fn forward(&self, message: &Value) -> Result<Bytes, TransportError> {
        let payload = serde_json::to_vec(message)?;
        let frame = framing::encode_frame(&payload);
        let seq = message.get("seq").and_then(Value::as_i64);

        let (reply, reply_rx) = oneshot::channel();
        let request = ControlMessage::Forward { seq, frame, reply };
        self.exchange(&self.control_tx, request, reply_rx).await?
    }

    /// Send `message` and wait for `rx`, both under the configured timeout.
    async fn exchange<M, T>(
        &self,
        tx: &mpsc::Sender<M>,
        message: M,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, TransportError> {
        let round_trip = async {
            tx.send(message)
                .await
                .map_err(|_| TransportError::WorkerGone)?;
            rx.await.map_err(|_| TransportError::WorkerGone)
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, round_trip)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => round_trip.await,
        }
    }
}
