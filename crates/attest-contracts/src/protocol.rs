//! Engine protocol messages.
//!
//! The SDK and the engine exchange newline-delimited JSON-RPC 2.0 objects over
//! the engine's stdio. This module holds the typed payloads of the methods the
//! SDK knows about; framing lives in `attest-engine::codec`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    assertion::{Assertion, AssertionResult},
    trace::Trace,
};

pub const JSONRPC_VERSION: &str = "2.0";

/// The protocol generation this SDK speaks.
pub const PROTOCOL_VERSION: u32 = 1;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_SHUTDOWN: &str = "shutdown";
pub const METHOD_EVALUATE_BATCH: &str = "evaluate_batch";
pub const METHOD_SUBMIT_PLUGIN_RESULT: &str = "submit_plugin_result";

// ── Error codes ──────────────────────────────────────────────────────────────

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Structured detail attached to an engine error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub error_type: String,

    /// Whether re-issuing the identical request is safe.
    #[serde(default)]
    pub retryable: bool,

    #[serde(default)]
    pub detail: String,
}

/// An outgoing JSON-RPC request.
///
/// Field order matters: it is the order the fields appear on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

// ── initialize ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    pub sdk_name: String,
    pub sdk_version: String,
    pub protocol_version: u32,
    pub required_capabilities: Vec<String>,
    #[serde(default = "default_encoding")]
    pub preferred_encoding: String,
}

fn default_encoding() -> String {
    "json".to_string()
}

/// The engine's handshake answer.
///
/// Only `compatible` and `missing` are load-bearing for the SDK; the rest is
/// informational and defaults when an older engine omits it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(default)]
    pub engine_version: String,
    #[serde(default)]
    pub protocol_version: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub missing: Vec<String>,
    pub compatible: bool,
    #[serde(default)]
    pub encoding: String,
    #[serde(default)]
    pub max_concurrent_requests: u32,
    #[serde(default)]
    pub max_trace_size_bytes: u64,
    #[serde(default)]
    pub max_steps_per_trace: u64,
}

// ── shutdown ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownResult {
    #[serde(default)]
    pub sessions_completed: u64,
    #[serde(default)]
    pub assertions_evaluated: u64,
}

// ── evaluate_batch ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateBatchParams {
    pub trace: Trace,
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluateBatchResult {
    #[serde(default)]
    pub results: Vec<AssertionResult>,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub total_duration_ms: u64,
}

// ── submit_plugin_result ─────────────────────────────────────────────────────

/// A verdict computed by an SDK-side plugin, reported so the engine can
/// include it in its session statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitPluginResultParams {
    pub trace_id: String,
    pub plugin_name: String,
    pub assertion_id: String,
    pub status: String,
    pub score: f64,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPluginResultResponse {
    #[serde(default)]
    pub accepted: bool,
}
