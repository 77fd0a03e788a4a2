//! Specialized request handlers.
//!
//! Each handler patches one gap between what the host expects and what the
//! engine provides. Handlers that post-process an engine reply take the
//! parsed reply and edit it in place; the round-trip itself belongs to the
//! [`Debugger`](crate::Debugger).

use nbdebug_core::{
    CellFiles, Interpreter, SessionState,
    cell::HASH_METHOD,
    protocol::{self, index_argument, string_field},
};
use serde_json::{Value, json};

/// Frame path the engine reports for the wrapper's own entry point.
pub const SYNTHETIC_FRAME_PATH: &str = "<string>";

/// Message of a failed `source` request.
pub const SOURCE_UNAVAILABLE: &str = "source unavailable";

/// `dumpCell`: write the cell's code to its content-addressed file.
///
/// A missing or mistyped `arguments.code` is logged and dumped as empty.
pub async fn dump_cell(files: &CellFiles, message: &Value) -> Value {
    let code = string_field(message, "/arguments/code");
    match files.dump(code).await {
        Ok(path) => {
            tracing::info!(path = %path, "dumped cell");
            protocol::success(message, json!({ "sourcePath": path }))
        }
        Err(e) => {
            tracing::error!(path = %files.path_for(code), "Failed to dump cell: {e}");
            protocol::failure(message, "cell dump failed")
        }
    }
}

/// `setBreakpoints`, local half: replace the registry entry for the source.
///
/// The request is still forwarded to the engine by the caller; this only
/// keeps `debugInfo` able to answer without a round-trip.
pub fn record_breakpoints(state: &SessionState, message: &Value) {
    let source = string_field(message, "/arguments/source/path");
    let breakpoints = match message.pointer("/arguments/breakpoints") {
        Some(Value::Array(list)) => list.clone(),
        Some(_) => {
            tracing::warn!("setBreakpoints: breakpoints is not a list, recording none");
            Vec::new()
        }
        None => Vec::new(),
    };
    state.set_breakpoints(source, breakpoints);
}

/// `source`: answer with the full text of the file at `arguments.source.path`.
///
/// Unreadable paths are a normal outcome (engine-internal pseudo-files) and
/// produce a `success: false` response.
pub async fn source(message: &Value) -> Value {
    let path = string_field(message, "/arguments/source/path");
    match tokio::fs::read_to_string(path).await {
        Ok(content) => protocol::success(message, json!({ "content": content })),
        Err(e) => {
            tracing::debug!(path, "source unavailable: {e}");
            protocol::failure(message, SOURCE_UNAVAILABLE)
        }
    }
}

/// `stackTrace`: hide the wrapper's synthetic frame.
///
/// Removes the first frame whose `source.path` is `<string>`, at most one.
/// With `normalize_separators`, backslashes in the remaining paths become
/// forward slashes.
pub fn filter_stack_trace(reply: &mut Value, normalize_separators: bool) {
    let Some(frames) = reply
        .pointer_mut("/body/stackFrames")
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    if let Some(index) = frames.iter().position(|frame| {
        frame.pointer("/source/path").and_then(Value::as_str) == Some(SYNTHETIC_FRAME_PATH)
    }) {
        frames.remove(index);
    }

    if normalize_separators {
        for frame in frames.iter_mut() {
            if let Some(path) = frame.pointer_mut("/source/path") {
                if let Some(normalized) = path.as_str().map(|p| p.replace('\\', "/")) {
                    *path = Value::String(normalized);
                }
            }
        }
    }
}

/// `variables`: apply DAP paging the engine does not implement.
///
/// With `start` and/or `count` present and at least one nonzero, keeps
/// `variables[start..start + count]` (or `variables[start..]` when `count`
/// is zero). Bounds are clamped to the list.
pub fn paginate_variables(request: &Value, reply: &mut Value) {
    let start = index_argument(request, "start");
    let count = index_argument(request, "count");
    if start.is_none() && count.is_none() {
        return;
    }

    let start = start.unwrap_or(0);
    let count = count.unwrap_or(0);
    if start == 0 && count == 0 {
        return;
    }

    let Some(variables) = reply
        .pointer_mut("/body/variables")
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    let len = variables.len();
    let begin = start.min(len);
    let end = if count == 0 {
        len
    } else {
        start.saturating_add(count).min(len)
    };
    *variables = variables.drain(begin..end).collect();
}

/// `debugInfo`: snapshot of the local session state.
///
/// Answerable whether or not a session is running. Breakpoints are only
/// reported while started.
#[must_use]
pub fn debug_info(
    message: &Value,
    started: bool,
    files: &CellFiles,
    state: &SessionState,
) -> Value {
    let breakpoints = if started {
        state.breakpoint_list()
    } else {
        Vec::new()
    };

    protocol::success(
        message,
        json!({
            "isStarted": started,
            "hashMethod": HASH_METHOD,
            "hashSeed": files.seed(),
            "tmpFilePrefix": files.prefix(),
            "tmpFileSuffix": files.suffix(),
            "breakpoints": breakpoints,
            "stoppedThreads": state.stopped_threads(),
        }),
    )
}

/// `inspectVariables`: globals of the interpreter, without the engine.
///
/// The engine's own `variables` needs a paused frame, which may not exist.
#[must_use]
pub fn inspect_variables(message: &Value, interpreter: &dyn Interpreter) -> Value {
    let variables: Vec<Value> = interpreter
        .globals()
        .into_iter()
        .map(|global| {
            json!({
                "name": global.name,
                "variablesReference": 0,
                "value": global.value.into_json(),
            })
        })
        .collect();

    protocol::success(message, json!({ "variables": variables }))
}
