//! Assertion request and result types.
//!
//! The core never interprets these. It serializes `Assertion`s into
//! `evaluate_batch` requests and deserializes the engine's verdicts back into
//! `AssertionResult`s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TYPE_SCHEMA: &str = "schema";
pub const TYPE_CONSTRAINT: &str = "constraint";
pub const TYPE_TRACE: &str = "trace";
pub const TYPE_CONTENT: &str = "content";
pub const TYPE_EMBEDDING: &str = "embedding";
pub const TYPE_LLM_JUDGE: &str = "llm_judge";
pub const TYPE_TRACE_TREE: &str = "trace_tree";

/// One check the engine should run against a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub assertion_id: String,

    /// The assertion family, e.g. `"schema"` or `"constraint"`.
    #[serde(rename = "type")]
    pub assertion_type: String,

    /// Family-specific parameters, forwarded untouched.
    pub spec: Value,
}

impl Assertion {
    pub fn new(
        assertion_id: impl Into<String>,
        assertion_type: impl Into<String>,
        spec: Value,
    ) -> Self {
        Self {
            assertion_id: assertion_id.into(),
            assertion_type: assertion_type.into(),
            spec,
        }
    }
}

/// The engine's verdict for one assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionStatus {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub assertion_id: String,
    pub status: AssertionStatus,

    /// Normalized score in `[0, 1]`, when the assertion family produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    #[serde(default)]
    pub explanation: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AssertionResult {
    pub fn passed(&self) -> bool {
        self.status == AssertionStatus::Pass
    }
}
