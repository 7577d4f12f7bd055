//! JSON pointer lookups shared by the provider adapters.

use serde_json::Value;

use attest_contracts::{
    error::{AttestError, AttestResult},
    trace::JsonMap,
};

/// The value at `pointer`, or an extraction error naming the path.
pub(crate) fn required<'a>(
    adapter: &'static str,
    response: &'a Value,
    pointer: &str,
) -> AttestResult<&'a Value> {
    response
        .pointer(pointer)
        .ok_or_else(|| AttestError::extraction(adapter, format!("missing {pointer}")))
}

/// The array at `pointer`, or an extraction error when absent or not an array.
pub(crate) fn required_array<'a>(
    adapter: &'static str,
    response: &'a Value,
    pointer: &str,
) -> AttestResult<&'a Vec<Value>> {
    required(adapter, response, pointer)?
        .as_array()
        .ok_or_else(|| AttestError::extraction(adapter, format!("{pointer} is not an array")))
}

/// The string at `key`; null or absent yields `""`, any other type is an error.
pub(crate) fn str_or_empty(
    adapter: &'static str,
    value: &Value,
    key: &str,
) -> AttestResult<String> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(AttestError::extraction(adapter, format!("{key} is not a string"))),
    }
}

pub(crate) fn optional_str(response: &Value, pointer: &str) -> Option<String> {
    response.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn optional_u64(response: &Value, pointer: &str) -> Option<u64> {
    response.pointer(pointer).and_then(Value::as_u64)
}

/// Sum of two optional counts; `None` only when both are absent.
pub(crate) fn sum_counts(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
    }
}

/// The tool name at `pointer` inside one tool-call entry.
pub(crate) fn tool_name(
    adapter: &'static str,
    entry: &Value,
    pointer: &str,
) -> AttestResult<String> {
    required(adapter, entry, pointer)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AttestError::extraction(adapter, format!("tool call {pointer} is not a string")))
}

/// The object itself, or an empty map for anything else.
pub(crate) fn object_or_empty(value: Option<&Value>) -> JsonMap {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => JsonMap::new(),
    }
}
