//! Session errors.

use nbdebug_transport::TransportError;

/// Failure while processing a host request.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Malformed engine reply: {0}")]
    EngineReply(#[from] serde_json::Error),
    #[error("Debug engine failed to start: {ename}: {evalue}")]
    EngineStart { ename: String, evalue: String },
    #[error("No free port in {start}..{end}")]
    NoFreePort { start: u16, end: u16 },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
