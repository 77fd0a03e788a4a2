//! Collaborator traits implemented by the hosting kernel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Outcome of running a code string in the embedded interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReply {
    /// `"ok"` on success, anything else on failure.
    pub status: String,
    /// Exception name on failure.
    #[serde(default)]
    pub ename: String,
    /// Exception value on failure.
    #[serde(default)]
    pub evalue: String,
    /// Formatted traceback lines on failure.
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl ExecutionReply {
    /// A successful reply.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            ename: String::new(),
            evalue: String::new(),
            traceback: Vec::new(),
        }
    }

    /// A failed reply.
    #[must_use]
    pub fn error(
        ename: impl Into<String>,
        evalue: impl Into<String>,
        traceback: Vec<String>,
    ) -> Self {
        Self {
            status: "error".to_string(),
            ename: ename.into(),
            evalue: evalue.into(),
            traceback,
        }
    }

    /// Whether the code ran without raising.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Value of a global variable as the interpreter could render it.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalValue {
    /// Directly representable as JSON.
    Json(Value),
    /// Textual fallback (`repr`).
    Repr(String),
}

impl GlobalValue {
    /// The value as it goes on the wire.
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Repr(text) => Value::String(text),
        }
    }
}

/// One entry of the interpreter's global scope.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    /// Variable name.
    pub name: String,
    /// Rendered value.
    pub value: GlobalValue,
}

/// Interpreter collaborator error.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("Interpreter unavailable")]
    Unavailable,
    #[error("Execution failed: {0}")]
    Execution(String),
}

/// The embedded interpreter the debugged code runs in.
///
/// The bridge never evaluates code itself. It asks the interpreter to bring
/// the debug engine up and to enumerate globals for `inspectVariables`.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Run `code` on the interpreter's main execution channel.
    async fn execute(&self, code: &str) -> Result<ExecutionReply, InterpreterError>;

    /// Snapshot of the current global scope.
    fn globals(&self) -> Vec<GlobalVariable>;
}
