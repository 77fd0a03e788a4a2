//! Debug session orchestration for notebook kernels.
//!
//! Provides:
//! - `Debugger` - Routes host requests, owns the session lifecycle
//! - `handlers` - Adaptations between host and engine protocol shapes

pub mod debugger;
pub mod error;
pub mod handlers;

pub use debugger::Debugger;
pub use error::BridgeError;
