//! Newline-delimited JSON-RPC 2.0 framing.
//!
//! One request per line out, one response per line in. Requests are compact
//! JSON so a line break can only ever be the frame terminator.

use serde_json::{Map, Value};

use attest_contracts::{
    error::{AttestError, AttestResult},
    protocol::{
        ErrorData, RpcRequest, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
        METHOD_NOT_FOUND, PARSE_ERROR,
    },
};

/// Serialize one request frame, terminating newline included.
pub fn encode_request(id: u64, method: &str, params: Value) -> AttestResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(&RpcRequest::new(id, method, params))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// A decoded, successful response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    fields: Map<String, Value>,
}

impl RpcResponse {
    /// The `result` member.
    pub fn result(&self) -> AttestResult<&Value> {
        self.fields
            .get("result")
            .ok_or_else(|| AttestError::decode("response has no 'result' field"))
    }

    /// Consume the envelope, keeping only the `result` member.
    pub fn into_result(mut self) -> AttestResult<Value> {
        self.fields
            .remove("result")
            .ok_or_else(|| AttestError::decode("response has no 'result' field"))
    }

    /// The response id as an integer. Numeric strings are accepted.
    pub fn id(&self) -> AttestResult<u64> {
        match self.fields.get("id") {
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| AttestError::decode(format!("response id {n} is not a non-negative integer"))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| AttestError::decode(format!("response id '{s}' is not an integer"))),
            Some(other) => Err(AttestError::decode(format!("response id has unexpected type: {other}"))),
            None => Err(AttestError::decode("response has no 'id' field")),
        }
    }
}

/// Parse one response line.
///
/// # Errors
///
/// - `Decode` for an empty line, invalid JSON, a non-object, or a `jsonrpc`
///   member other than `"2.0"`.
/// - `Protocol` when the envelope carries a non-null `error` object.
pub fn decode_response(line: &str) -> AttestResult<RpcResponse> {
    let line = line.trim();
    if line.is_empty() {
        return Err(AttestError::decode("empty response line"));
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|e| AttestError::decode(format!("invalid JSON: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(AttestError::decode("response is not a JSON object"));
    };

    match fields.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        other => {
            return Err(AttestError::decode(format!(
                "expected jsonrpc \"2.0\", got {}",
                other.map_or_else(|| "nothing".to_string(), Value::to_string)
            )))
        }
    }

    if let Some(error) = fields.get("error").filter(|e| !e.is_null()) {
        return Err(protocol_error(error));
    }

    Ok(RpcResponse { fields })
}

fn protocol_error(error: &Value) -> AttestError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let data = error
        .get("data")
        .filter(|d| d.is_object())
        .map(|d| ErrorData {
            error_type: d.get("error_type").and_then(Value::as_str).unwrap_or_default().to_string(),
            retryable: d.get("retryable").and_then(Value::as_bool).unwrap_or(false),
            detail: d.get("detail").and_then(Value::as_str).unwrap_or_default().to_string(),
        });
    AttestError::Protocol { code, message, data }
}

/// Human-readable name for a standard JSON-RPC error code.
pub fn code_name(code: i64) -> &'static str {
    match code {
        PARSE_ERROR => "parse error",
        INVALID_REQUEST => "invalid request",
        METHOD_NOT_FOUND => "method not found",
        INVALID_PARAMS => "invalid params",
        INTERNAL_ERROR => "internal error",
        -32099..=-32000 => "server error",
        _ => "application error",
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
