//! The provider adapter contract.
//!
//! A provider adapter turns one raw model response into a canonical `Trace`.
//! Each provider differs only in where the completion text, model name, token
//! count and tool calls live inside its response. Those four lookups are the
//! required hooks; the shared procedure that assembles the trace is the
//! provided `trace_from_response` method, which no adapter overrides.
//!
//! Streaming frameworks and span exporters do not fit the one-response shape
//! and live in `attest-adapters` as their own types.

use chrono::Utc;
use serde_json::Value;

use attest_contracts::{
    error::AttestResult,
    trace::{message_output, JsonMap, Trace},
};

use crate::builder::{MetadataUpdate, StepSpec, TraceBuilder};

/// A tool invocation extracted from a provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Option<JsonMap>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Option<JsonMap>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Caller-supplied facts about a call that the response itself does not carry.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// The messages sent to the provider, recorded as the trace input.
    pub input_messages: Vec<Value>,
    /// Wall-clock ms when the call started. Defaults to now.
    pub started_at_ms: Option<i64>,
    /// Wall-clock ms when the call ended. Defaults to now.
    pub ended_at_ms: Option<i64>,
    pub cost_usd: Option<f64>,
    pub latency_ms: Option<u64>,
    /// Parsed structured output, for adapters that surface it.
    pub structured_output: Option<JsonMap>,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Normalizes one provider's response shape into a canonical trace.
pub trait ProviderAdapter {
    /// The raw response type this adapter reads.
    type Response;

    /// Short provider label used in error messages, e.g. `"openai"`.
    fn provider(&self) -> &'static str;

    /// The agent id every produced trace is tagged with.
    fn agent_id(&self) -> Option<&str>;

    /// The completion text. Fails when the response lacks it entirely.
    fn extract_completion(&self, response: &Self::Response) -> AttestResult<String>;

    fn extract_model(&self, response: &Self::Response) -> Option<String>;

    fn extract_total_tokens(&self, response: &Self::Response) -> Option<u64>;

    /// Tool calls in the order the provider listed them.
    fn extract_tool_calls(&self, response: &Self::Response) -> AttestResult<Vec<ToolCall>>;

    /// The trace input. Defaults to `{"messages": [...]}` when any were sent.
    fn extract_input(&self, messages: &[Value]) -> Option<JsonMap> {
        if messages.is_empty() {
            return None;
        }
        let mut input = JsonMap::new();
        input.insert("messages".to_string(), Value::Array(messages.to_vec()));
        Some(input)
    }

    /// The trace output. Defaults to `{"message": completion}`.
    fn build_output(
        &self,
        _response: &Self::Response,
        completion: &str,
        _ctx: &CallContext,
    ) -> JsonMap {
        message_output(completion)
    }

    /// Assemble a trace from one response.
    ///
    /// Produces one `llm_call` step named `completion` followed by one
    /// `tool_call` step per extracted tool call, in order. All extraction
    /// happens before the builder is touched, so a failing hook never yields
    /// a partially populated trace.
    fn trace_from_response(
        &self,
        response: &Self::Response,
        ctx: &CallContext,
    ) -> AttestResult<Trace> {
        let now = now_ms();
        let started_at_ms = ctx.started_at_ms.unwrap_or(now);
        let ended_at_ms = ctx.ended_at_ms.unwrap_or(now);

        let completion = self.extract_completion(response)?;
        let model = self.extract_model(response);
        let total_tokens = self.extract_total_tokens(response);
        let tool_calls = self.extract_tool_calls(response)?;

        let mut builder = TraceBuilder::new(self.agent_id().map(str::to_string));
        if let Some(input) = self.extract_input(&ctx.input_messages) {
            builder.set_input(input);
        }

        let mut args = JsonMap::new();
        if let Some(model) = &model {
            args.insert("model".to_string(), Value::String(model.clone()));
        }
        let mut result = JsonMap::new();
        result.insert("completion".to_string(), Value::String(completion.clone()));
        if let Some(tokens) = total_tokens {
            result.insert("tokens".to_string(), Value::from(tokens));
        }
        builder.add_llm_call(
            StepSpec::new("completion")
                .args(args)
                .result(result)
                .timing(started_at_ms, ended_at_ms),
        );

        for call in tool_calls {
            builder.add_tool_call(StepSpec::new(call.name).maybe_args(call.args));
        }

        builder.set_output_map(self.build_output(response, &completion, ctx));
        builder.set_metadata(MetadataUpdate {
            total_tokens,
            cost_usd: ctx.cost_usd,
            latency_ms: ctx.latency_ms,
            model,
        });

        tracing::debug!(provider = self.provider(), "normalized provider response");
        builder.build()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use attest_contracts::{
        error::{AttestError, AttestResult},
        trace::{into_map, JsonMap, StepType},
    };

    use super::{CallContext, ProviderAdapter, ToolCall};

    /// A response type with every field spelled out.
    struct FakeResponse {
        text: Option<&'static str>,
        model: Option<&'static str>,
        tokens: Option<u64>,
        tools: Vec<(&'static str, Value)>,
    }

    struct FakeAdapter;

    impl ProviderAdapter for FakeAdapter {
        type Response = FakeResponse;

        fn provider(&self) -> &'static str {
            "fake"
        }

        fn agent_id(&self) -> Option<&str> {
            Some("support-bot")
        }

        fn extract_completion(&self, r: &FakeResponse) -> AttestResult<String> {
            r.text
                .map(str::to_string)
                .ok_or_else(|| AttestError::extraction("fake", "missing text"))
        }

        fn extract_model(&self, r: &FakeResponse) -> Option<String> {
            r.model.map(str::to_string)
        }

        fn extract_total_tokens(&self, r: &FakeResponse) -> Option<u64> {
            r.tokens
        }

        fn extract_tool_calls(&self, r: &FakeResponse) -> AttestResult<Vec<ToolCall>> {
            Ok(r.tools
                .iter()
                .map(|(name, args)| ToolCall::new(*name, into_map(args.clone())))
                .collect())
        }
    }

    /// Overrides both optional hooks.
    struct StructuredAdapter;

    impl ProviderAdapter for StructuredAdapter {
        type Response = FakeResponse;

        fn provider(&self) -> &'static str {
            "structured"
        }
        fn agent_id(&self) -> Option<&str> {
            None
        }
        fn extract_completion(&self, r: &FakeResponse) -> AttestResult<String> {
            FakeAdapter.extract_completion(r)
        }
        fn extract_model(&self, _: &FakeResponse) -> Option<String> {
            None
        }
        fn extract_total_tokens(&self, _: &FakeResponse) -> Option<u64> {
            None
        }
        fn extract_tool_calls(&self, _: &FakeResponse) -> AttestResult<Vec<ToolCall>> {
            Ok(Vec::new())
        }
        fn extract_input(&self, _: &[Value]) -> Option<JsonMap> {
            into_map(json!({ "prompt": "fixed" }))
        }
        fn build_output(&self, _: &FakeResponse, completion: &str, ctx: &CallContext) -> JsonMap {
            let mut out = JsonMap::new();
            out.insert("message".into(), Value::String(completion.to_uppercase()));
            out.insert(
                "structured".into(),
                Value::Object(ctx.structured_output.clone().unwrap_or_default()),
            );
            out
        }
    }

    fn response_with_two_tools() -> FakeResponse {
        FakeResponse {
            text: Some("Your refund is on its way."),
            model: Some("gpt-4.1"),
            tokens: Some(150),
            tools: vec![
                ("lookup_order", json!({ "order_id": "ORD-1" })),
                ("process_refund", json!({ "amount": 89.99 })),
            ],
        }
    }

    // ── trace_from_response ──────────────────────────────────────────────────

    #[test]
    fn one_llm_step_then_tool_steps_in_order() {
        let ctx = CallContext {
            input_messages: vec![json!({ "role": "user", "content": "refund please" })],
            started_at_ms: Some(1_000),
            ended_at_ms: Some(1_450),
            cost_usd: Some(0.002),
            latency_ms: Some(450),
            structured_output: None,
        };
        let trace = FakeAdapter.trace_from_response(&response_with_two_tools(), &ctx).unwrap();

        assert_eq!(trace.steps.len(), 3);
        assert_eq!(trace.agent_id.as_deref(), Some("support-bot"));

        let llm = &trace.steps[0];
        assert_eq!(llm.step_type, StepType::LlmCall);
        assert_eq!(llm.name, "completion");
        assert_eq!(llm.args.as_ref().unwrap()["model"], "gpt-4.1");
        assert_eq!(llm.result.as_ref().unwrap()["tokens"], 150);
        assert_eq!(llm.started_at_ms, Some(1_000));
        assert_eq!(llm.ended_at_ms, Some(1_450));

        assert_eq!(trace.steps[1].name, "lookup_order");
        assert_eq!(trace.steps[1].step_type, StepType::ToolCall);
        assert_eq!(trace.steps[2].name, "process_refund");

        let meta = trace.metadata.as_ref().unwrap();
        assert_eq!(meta.total_tokens, Some(150));
        assert_eq!(meta.model.as_deref(), Some("gpt-4.1"));
        assert_eq!(meta.cost_usd, Some(0.002));
        assert_eq!(meta.latency_ms, Some(450));

        assert_eq!(trace.output_message(), Some("Your refund is on its way."));
        assert!(trace.input.as_ref().unwrap().contains_key("messages"));
    }

    #[test]
    fn timestamps_default_to_now() {
        let before = super::now_ms();
        let trace = FakeAdapter
            .trace_from_response(&response_with_two_tools(), &CallContext::default())
            .unwrap();
        let started = trace.steps[0].started_at_ms.unwrap();
        assert!(started >= before);
        assert_eq!(trace.steps[0].ended_at_ms, Some(started));
    }

    #[test]
    fn explicit_start_keeps_default_end_at_now() {
        let ctx = CallContext { started_at_ms: Some(5), ..Default::default() };
        let before = super::now_ms();
        let trace = FakeAdapter.trace_from_response(&response_with_two_tools(), &ctx).unwrap();
        assert_eq!(trace.steps[0].started_at_ms, Some(5));
        assert!(trace.steps[0].ended_at_ms.unwrap() >= before);
    }

    #[test]
    fn no_input_when_no_messages() {
        let trace = FakeAdapter
            .trace_from_response(&response_with_two_tools(), &CallContext::default())
            .unwrap();
        assert!(trace.input.is_none());
    }

    #[test]
    fn missing_model_and_tokens_leave_fields_out() {
        let response = FakeResponse { text: Some("hi"), model: None, tokens: None, tools: vec![] };
        let trace = FakeAdapter.trace_from_response(&response, &CallContext::default()).unwrap();

        assert_eq!(trace.steps.len(), 1);
        assert!(trace.steps[0].args.as_ref().unwrap().is_empty());
        assert!(!trace.steps[0].result.as_ref().unwrap().contains_key("tokens"));
        assert!(trace.metadata.is_none());
    }

    #[test]
    fn extraction_failure_yields_no_trace() {
        let response = FakeResponse { text: None, model: None, tokens: None, tools: vec![] };
        let err = FakeAdapter.trace_from_response(&response, &CallContext::default()).unwrap_err();
        assert!(matches!(err, AttestError::Extraction { .. }));
    }

    #[test]
    fn optional_hooks_can_be_overridden() {
        let ctx = CallContext {
            structured_output: into_map(json!({ "refund_id": "RFD-1" })),
            ..Default::default()
        };
        let response = FakeResponse { text: Some("ok"), model: None, tokens: None, tools: vec![] };
        let trace = StructuredAdapter.trace_from_response(&response, &ctx).unwrap();

        assert_eq!(trace.output_message(), Some("OK"));
        assert_eq!(trace.output["structured"]["refund_id"], "RFD-1");
        assert_eq!(trace.input.as_ref().unwrap()["prompt"], "fixed");
        assert!(trace.agent_id.is_none());
    }
}
