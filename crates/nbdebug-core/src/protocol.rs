//! DAP-shaped message helpers.
//!
//! Requests arrive from the host as loosely typed JSON. Fields are read
//! leniently: a missing or mistyped field yields a default and a warning,
//! never an error.

use serde_json::{Map, Value, json};

/// Command name of a request, or `""` when absent.
#[must_use]
pub fn command(message: &Value) -> &str {
    message.get("command").and_then(Value::as_str).unwrap_or_default()
}

/// Sequence number of a message, `Null` when absent.
#[must_use]
pub fn seq(message: &Value) -> Value {
    message.get("seq").cloned().unwrap_or(Value::Null)
}

/// Request arguments, `Null` when absent.
#[must_use]
pub fn arguments(message: &Value) -> &Value {
    message.get("arguments").unwrap_or(&Value::Null)
}

/// Read a string at `pointer` (RFC 6901) inside `message`.
///
/// Missing or non-string values log a warning and yield `""`.
#[must_use]
pub fn string_field<'a>(message: &'a Value, pointer: &str) -> &'a str {
    match message.pointer(pointer) {
        Some(Value::String(s)) => s.as_str(),
        Some(other) => {
            tracing::warn!(
                field = pointer,
                found = json_type_name(other),
                "expected a string in debug request"
            );
            ""
        }
        None => {
            tracing::warn!(field = pointer, "missing field in debug request");
            ""
        }
    }
}

/// Read a non-negative integer argument, treating absent as `None`.
///
/// Negative or non-integer values are treated as zero.
#[must_use]
pub fn index_argument(message: &Value, name: &str) -> Option<usize> {
    let value = arguments(message).get(name)?;
    let index = value
        .as_u64()
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or_else(|| {
            if !value.is_i64() {
                tracing::warn!(field = name, "non-integer paging argument treated as 0");
            }
            0
        });
    Some(index)
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Build a successful response to `request`.
#[must_use]
pub fn success(request: &Value, body: Value) -> Value {
    json!({
        "type": "response",
        "request_seq": seq(request),
        "success": true,
        "command": command(request),
        "body": body,
    })
}

/// Build a failed response to `request` carrying `message`.
#[must_use]
pub fn failure(request: &Value, message: &str) -> Value {
    json!({
        "type": "response",
        "request_seq": seq(request),
        "success": false,
        "command": command(request),
        "message": message,
        "body": Value::Object(Map::new()),
    })
}

/// Reply returned when no stage produced one.
#[must_use]
pub fn empty_reply() -> Value {
    Value::Object(Map::new())
}

/// Whether an engine frame is an event.
#[must_use]
pub fn is_event(message: &Value) -> bool {
    message.get("type").and_then(Value::as_str) == Some("event")
}

/// Whether an engine frame is a response.
#[must_use]
pub fn is_response(message: &Value) -> bool {
    message.get("type").and_then(Value::as_str) == Some("response")
}
