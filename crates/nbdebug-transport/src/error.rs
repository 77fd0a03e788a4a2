//! Transport errors.

use std::time::Duration;

use thiserror::Error;

/// Malformed DAP framing.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("Missing Content-Length header")]
    MissingContentLength,
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),
    #[error("Header exceeds {0} bytes without a separator")]
    HeaderTooLarge(usize),
    #[error("Content-Length {length} exceeds maximum message size {max}")]
    MessageTooLarge { length: usize, max: usize },
    #[error("Header is not UTF-8")]
    HeaderEncoding,
}

/// Failure of a single engine interaction.
///
/// None of these are retried: DAP requests are not idempotent in general.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot connect to engine at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },
    #[error("Engine worker is gone")]
    WorkerGone,
    #[error("Engine did not answer within {0:?}")]
    Timeout(Duration),
}
