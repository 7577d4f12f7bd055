//! Trace capture from a finished batch of OpenTelemetry spans.
//!
//! Spans are read through the GenAI semantic-convention attributes. A span
//! whose `gen_ai.operation.name` is a chat or completion operation becomes an
//! `llm_call`; otherwise a span naming a tool becomes a `tool_call`; anything
//! else is skipped. Steps keep batch order.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use attest_contracts::{
    error::AttestResult,
    trace::{JsonMap, Trace},
};
use attest_core::builder::{MetadataUpdate, StepSpec, TraceBuilder};

pub const ATTR_OPERATION_NAME: &str = "gen_ai.operation.name";
pub const ATTR_REQUEST_MODEL: &str = "gen_ai.request.model";
pub const ATTR_RESPONSE_MODEL: &str = "gen_ai.response.model";
pub const ATTR_COMPLETION: &str = "gen_ai.completion";
pub const ATTR_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const ATTR_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
pub const ATTR_TOOL_NAME: &str = "gen_ai.tool.name";
pub const ATTR_TOOL_PARAMETERS: &str = "gen_ai.tool.parameters";
pub const ATTR_TOOL_OUTPUT: &str = "gen_ai.tool.output";

const LLM_OPERATIONS: [&str; 3] = ["chat", "completion", "text_completion"];

/// Prefix of trace ids derived from an OpenTelemetry trace id.
pub const OTEL_TRACE_ID_PREFIX: &str = "otel_";

/// The subset of a finished span the adapter reads.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub name: String,
    pub trace_id: u128,
    pub span_id: u64,
    pub parent_span_id: Option<u64>,
    pub start_time_ns: u64,
    pub end_time_ns: u64,
    pub attributes: JsonMap,
}

impl SpanRecord {
    fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attributes.get(key).and_then(Value::as_u64)
    }

    fn duration_ns(&self) -> u64 {
        self.end_time_ns.saturating_sub(self.start_time_ns)
    }
}

/// Converts span batches into traces.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanBatchAdapter;

impl SpanBatchAdapter {
    /// Build one trace from `spans`.
    ///
    /// The trace id is derived from the first span's trace id, so the same
    /// batch always maps to the same id. An empty batch yields an empty trace
    /// with a generated id.
    pub fn from_spans(spans: &[SpanRecord], agent_id: Option<&str>) -> AttestResult<Trace> {
        let mut builder = TraceBuilder::new(agent_id.map(str::to_string));
        if let Some(first) = spans.first() {
            builder.set_trace_id(format!("{OTEL_TRACE_ID_PREFIX}{:032x}", first.trace_id));
        }

        let mut total_tokens: Option<u64> = None;
        let mut response_model: Option<String> = None;
        let mut request_model: Option<String> = None;
        let mut last_completion: Option<String> = None;

        for span in spans {
            let input = span.attr_u64(ATTR_INPUT_TOKENS);
            let output = span.attr_u64(ATTR_OUTPUT_TOKENS);
            if input.is_some() || output.is_some() {
                let sum = input.unwrap_or(0).saturating_add(output.unwrap_or(0));
                total_tokens = Some(total_tokens.unwrap_or(0).saturating_add(sum));
            }
            if response_model.is_none() {
                response_model = span.attr_str(ATTR_RESPONSE_MODEL).map(str::to_string);
            }
            if request_model.is_none() {
                request_model = span.attr_str(ATTR_REQUEST_MODEL).map(str::to_string);
            }

            let operation = span.attr_str(ATTR_OPERATION_NAME);
            if let Some(op) = operation.filter(|op| LLM_OPERATIONS.contains(op)) {
                let mut args = JsonMap::new();
                if let Some(model) = span.attr_str(ATTR_REQUEST_MODEL) {
                    args.insert("model".to_string(), Value::String(model.to_string()));
                }
                let mut result = JsonMap::new();
                if let Some(completion) = span.attr_str(ATTR_COMPLETION) {
                    result.insert("completion".to_string(), Value::String(completion.to_string()));
                    last_completion = Some(completion.to_string());
                }
                if let Some(n) = input {
                    result.insert("input_tokens".to_string(), Value::from(n));
                }
                if let Some(n) = output {
                    result.insert("output_tokens".to_string(), Value::from(n));
                }
                builder.add_llm_call(timed(StepSpec::new(op).args(args).result(result), span));
            } else if let Some(tool) = span.attr_str(ATTR_TOOL_NAME) {
                let mut spec = StepSpec::new(tool)
                    .maybe_args(span.attributes.get(ATTR_TOOL_PARAMETERS).map(tool_parameters));
                if let Some(raw) = span.attributes.get(ATTR_TOOL_OUTPUT) {
                    let mut result = JsonMap::new();
                    result.insert("output".to_string(), raw.clone());
                    spec = spec.result(result);
                }
                builder.add_tool_call(timed(spec, span));
            } else {
                debug!(span = %span.name, "span carries no GenAI operation or tool, skipping");
            }
        }

        builder.set_output(last_completion.unwrap_or_default(), None);
        builder.set_metadata(MetadataUpdate {
            total_tokens,
            cost_usd: None,
            latency_ms: root_latency_ms(spans),
            model: response_model.or(request_model),
        });
        builder.build()
    }
}

/// Attach wall-clock timing and `duration_ms` derived from the span.
fn timed(spec: StepSpec, span: &SpanRecord) -> StepSpec {
    let mut metadata = JsonMap::new();
    metadata.insert(
        "duration_ms".to_string(),
        Value::from(span.duration_ns() as f64 / 1e6),
    );
    spec.metadata(metadata)
        .timing(ns_to_ms(span.start_time_ns), ns_to_ms(span.end_time_ns))
}

fn ns_to_ms(ns: u64) -> i64 {
    i64::try_from(ns / 1_000_000).unwrap_or(i64::MAX)
}

/// Tool parameters as an object: parsed when the attribute is a JSON object
/// string, kept verbatim under `"parameters"` otherwise.
fn tool_parameters(raw: &Value) -> JsonMap {
    let parsed = match raw {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    };
    parsed.unwrap_or_else(|| {
        let mut map = JsonMap::new();
        map.insert("parameters".to_string(), raw.clone());
        map
    })
}

/// Duration of the first root span in batch order. A span is a root when it
/// has no parent or its parent is not part of the batch.
fn root_latency_ms(spans: &[SpanRecord]) -> Option<u64> {
    let ids: HashSet<u64> = spans.iter().map(|s| s.span_id).collect();
    spans
        .iter()
        .find(|s| s.parent_span_id.map_or(true, |p| !ids.contains(&p)))
        .map(|s| s.duration_ns() / 1_000_000)
}

// ── Tests ────────────────────────────────────────────────────────────────────
