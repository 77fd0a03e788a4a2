//! Local bookkeeping mirrored from the engine.
//!
//! The engine owns the authoritative debug state. This module keeps just
//! enough of it to answer `debugInfo` without a round-trip: the breakpoints
//! the host installed and the threads currently halted.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use serde_json::{Value, json};

/// Breakpoints per source path, as last sent by the host.
pub type BreakpointRegistry = BTreeMap<String, Vec<Value>>;

/// Ids of threads halted at a breakpoint or step.
pub type StoppedThreadSet = BTreeSet<i64>;

/// Session bookkeeping shared between the request flow and the engine worker.
///
/// Each registry has its own lock. The request flow is the only writer of
/// the breakpoint registry; the engine worker is the only writer of the
/// stopped-thread set.
#[derive(Debug, Default)]
pub struct SessionState {
    breakpoints: Mutex<BreakpointRegistry>,
    stopped_threads: Mutex<StoppedThreadSet>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionState {
    /// Create empty session state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the breakpoints recorded for `source`.
    pub fn set_breakpoints(&self, source: impl Into<String>, breakpoints: Vec<Value>) {
        let source = source.into();
        let mut registry = lock(&self.breakpoints);
        registry.remove(&source);
        registry.insert(source, breakpoints);
    }

    /// Breakpoints recorded for `source`.
    #[must_use]
    pub fn breakpoints_for(&self, source: &str) -> Option<Vec<Value>> {
        lock(&self.breakpoints).get(source).cloned()
    }

    /// The registry flattened to `[{source, breakpoints}]`.
    #[must_use]
    pub fn breakpoint_list(&self) -> Vec<Value> {
        lock(&self.breakpoints)
            .iter()
            .map(|(source, breakpoints)| json!({"source": source, "breakpoints": breakpoints}))
            .collect()
    }

    /// Snapshot of the stopped-thread set.
    #[must_use]
    pub fn stopped_threads(&self) -> Vec<i64> {
        lock(&self.stopped_threads).iter().copied().collect()
    }

    /// Apply an engine event to the stopped-thread set.
    ///
    /// `stopped` inserts `body.threadId`, `continued` removes it. Other events
    /// and events without a thread id leave the set untouched.
    pub fn handle_event(&self, message: &Value) {
        let event = message.get("event").and_then(Value::as_str).unwrap_or_default();
        let thread_id = message.pointer("/body/threadId").and_then(Value::as_i64);

        match (event, thread_id) {
            ("stopped", Some(id)) => {
                lock(&self.stopped_threads).insert(id);
            }
            ("continued", Some(id)) => {
                lock(&self.stopped_threads).remove(&id);
            }
            ("stopped" | "continued", None) => {
                tracing::warn!(event, "engine event without a thread id");
            }
            _ => {}
        }
    }

    /// Forget everything. Called when the session stops.
    pub fn clear(&self) {
        lock(&self.breakpoints).clear();
        lock(&self.stopped_threads).clear();
    }
}
