//! Transport layer between the bridge and the debug engine.
//!
//! Provides:
//! - DAP wire framing (`Content-Length` header + JSON payload)
//! - Local proxy channels: primary request/reply and the sync barrier
//! - The engine worker owning the TCP connection to the engine

pub mod channel;
pub mod client;
pub mod error;
pub mod framing;

pub use channel::{ProxyEndpoints, WorkerEndpoints, bind};
pub use client::{EngineWorker, WorkerHandle};
pub use error::{FramingError, TransportError};
pub use framing::{FrameDecoder, encode_frame};
