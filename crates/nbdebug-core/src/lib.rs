//! Core abstractions for the notebook debug bridge.
//!
//! This crate provides the fundamental building blocks:
//! - `protocol` - DAP-shaped request/response helpers
//! - `SessionState` - Breakpoint registry and stopped-thread set
//! - `CellFiles` - Content-addressed mapping from cell code to temp files
//! - `EventStore` - Broadcast + history for debug events sent to the host
//! - `BridgeConfig` - Tunables for endpoints, workspace and timeouts
//! - `Interpreter` - Collaborator trait for the embedded runtime

pub mod cell;
pub mod config;
pub mod event_store;
pub mod protocol;
pub mod state;
pub mod system;
pub mod traits;

pub use cell::CellFiles;
pub use config::BridgeConfig;
pub use event_store::{DebugEvent, EventStore};
pub use state::SessionState;
pub use traits::{ExecutionReply, GlobalValue, GlobalVariable, Interpreter, InterpreterError};
