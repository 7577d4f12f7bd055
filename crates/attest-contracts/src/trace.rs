//! The canonical trace model.
//!
//! Every adapter normalizes into these types, the tree view walks them, and
//! the engine receives them verbatim as JSON. A `Trace` is produced by
//! `attest_core::TraceBuilder` and is never mutated after `build()`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object, the shape of every free-form field in a trace.
pub type JsonMap = Map<String, Value>;

/// Prefix carried by every auto-generated trace identifier.
pub const TRACE_ID_PREFIX: &str = "trc_";

/// Generate a fresh trace id: `trc_` followed by 12 lowercase hex characters.
pub fn generate_trace_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{TRACE_ID_PREFIX}{}", &hex[..12])
}

/// What kind of event a `Step` captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// A call to a language model.
    LlmCall,
    /// A tool or function invocation.
    ToolCall,
    /// A retrieval against an index or document store.
    Retrieval,
    /// A delegation to a sub-agent. Carries a nested `Trace`.
    AgentCall,
}

impl StepType {
    /// The wire name of this step type.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::LlmCall => "llm_call",
            StepType::ToolCall => "tool_call",
            StepType::Retrieval => "retrieval",
            StepType::AgentCall => "agent_call",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured event within a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// The model call label, tool name, retriever name, or delegation label.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<JsonMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonMap>,

    /// Free-form per-step data such as `duration_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,

    /// Wall-clock milliseconds since the Unix epoch when the step started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<i64>,

    /// Wall-clock milliseconds since the Unix epoch when the step ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<i64>,

    /// The delegated agent's own trace. Only present on `agent_call` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_trace: Option<Box<Trace>>,
}

impl Step {
    /// A bare step with only a type and a name.
    pub fn new(step_type: StepType, name: impl Into<String>) -> Self {
        Self {
            step_type,
            name: name.into(),
            args: None,
            result: None,
            metadata: None,
            started_at_ms: None,
            ended_at_ms: None,
            sub_trace: None,
        }
    }

    /// Attach an argument map.
    pub fn with_args(mut self, args: JsonMap) -> Self {
        self.args = Some(args);
        self
    }

    /// Attach a result map.
    pub fn with_result(mut self, result: JsonMap) -> Self {
        self.result = Some(result);
        self
    }

    /// Turn this step into a delegation owning `sub_trace`.
    pub fn with_sub_trace(mut self, sub_trace: Trace) -> Self {
        self.step_type = StepType::AgentCall;
        self.sub_trace = Some(Box::new(sub_trace));
        self
    }

    pub fn is_tool_call(&self) -> bool {
        self.step_type == StepType::ToolCall
    }
}

/// Aggregates describing a whole execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TraceMetadata {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.total_tokens.is_none()
            && self.cost_usd.is_none()
            && self.latency_ms.is_none()
            && self.model.is_none()
    }
}

/// The immutable record of one agent execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<JsonMap>,

    pub output: JsonMap,

    /// Steps in capture order.
    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TraceMetadata>,
}

impl Trace {
    /// Construct a trace from already-normalized parts.
    ///
    /// Intended for tests and for ingesting traces that were built elsewhere.
    /// Live capture goes through `TraceBuilder`.
    pub fn new(
        trace_id: impl Into<String>,
        agent_id: Option<String>,
        output: JsonMap,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            agent_id,
            input: None,
            output,
            steps,
            metadata: None,
        }
    }

    /// The `output.message` text, if present and a string.
    pub fn output_message(&self) -> Option<&str> {
        self.output.get("message").and_then(Value::as_str)
    }

    /// The label used for this trace in delegation pairs: its agent id, or
    /// its trace id when the agent is anonymous.
    pub fn agent_label(&self) -> &str {
        self.agent_id.as_deref().unwrap_or(&self.trace_id)
    }
}

/// Convert a JSON value into a map, or `None` when it is not an object.
pub fn into_map(value: Value) -> Option<JsonMap> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Build the `{"message": text}` output map used as the default output.
pub fn message_output(message: impl Into<String>) -> JsonMap {
    let mut map = JsonMap::new();
    map.insert("message".to_string(), Value::String(message.into()));
    map
}
