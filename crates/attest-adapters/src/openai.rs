//! OpenAI Chat Completions responses.

use serde_json::Value;

use attest_contracts::{error::AttestResult, trace::JsonMap};
use attest_core::adapter::{CallContext, ProviderAdapter, ToolCall};

use crate::fields::{optional_str, optional_u64, required, str_or_empty, tool_name};

const PROVIDER: &str = "openai";

/// Reads a `chat.completion` object.
///
/// Tool call arguments are kept as the raw JSON string the model produced,
/// under `{"arguments": ...}`, since they are not guaranteed to parse.
#[derive(Debug, Clone, Default)]
pub struct OpenAiAdapter {
    agent_id: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(agent_id: Option<String>) -> Self {
        Self { agent_id }
    }
}

impl ProviderAdapter for OpenAiAdapter {
    type Response = Value;

    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    fn extract_completion(&self, response: &Value) -> AttestResult<String> {
        let message = required(PROVIDER, response, "/choices/0/message")?;
        str_or_empty(PROVIDER, message, "content")
    }

    fn extract_model(&self, response: &Value) -> Option<String> {
        optional_str(response, "/model")
    }

    fn extract_total_tokens(&self, response: &Value) -> Option<u64> {
        optional_u64(response, "/usage/total_tokens")
    }

    fn extract_tool_calls(&self, response: &Value) -> AttestResult<Vec<ToolCall>> {
        let message = required(PROVIDER, response, "/choices/0/message")?;
        let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        calls
            .iter()
            .map(|call| {
                let name = tool_name(PROVIDER, call, "/function/name")?;
                let raw = call
                    .pointer("/function/arguments")
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                let mut args = JsonMap::new();
                args.insert("arguments".to_string(), raw);
                Ok(ToolCall::new(name, Some(args)))
            })
            .collect()
    }

    fn build_output(&self, _response: &Value, completion: &str, ctx: &CallContext) -> JsonMap {
        let mut output = JsonMap::new();
        output.insert("message".to_string(), Value::String(completion.to_string()));
        output.insert(
            "structured".to_string(),
            Value::Object(ctx.structured_output.clone().unwrap_or_default()),
        );
        output
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use attest_contracts::{error::AttestError, trace::StepType};
    use attest_core::adapter::{CallContext, ProviderAdapter};

    use super::OpenAiAdapter;

    fn refund_response() -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-4.1-2025-04-14",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Let me check that order.",
                    "tool_calls": [
                        {
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "lookup_order", "arguments": "{\"order_id\":\"ORD-123\"}" }
                        },
                        {
                            "id": "call_2",
                            "type": "function",
                            "function": { "name": "process_refund", "arguments": "{\"amount\":89.99}" }
                        }
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
        })
    }

    #[test]
    fn two_tool_calls_give_three_steps() {
        let adapter = OpenAiAdapter::new(Some("refund-agent".into()));
        let trace = adapter
            .trace_from_response(&refund_response(), &CallContext::default())
            .unwrap();

        assert_eq!(trace.steps.len(), 3);
        assert_eq!(trace.steps[0].step_type, StepType::LlmCall);
        assert_eq!(trace.steps[1].name, "lookup_order");
        assert_eq!(
            trace.steps[1].args.as_ref().unwrap()["arguments"],
            "{\"order_id\":\"ORD-123\"}"
        );
        assert_eq!(trace.steps[2].name, "process_refund");

        let meta = trace.metadata.as_ref().unwrap();
        assert_eq!(meta.total_tokens, Some(150));
        assert_eq!(meta.model.as_deref(), Some("gpt-4.1-2025-04-14"));
        assert_eq!(trace.output["structured"], json!({}));
    }

    #[test]
    fn null_content_becomes_empty_completion() {
        let mut response = refund_response();
        response["choices"][0]["message"]["content"] = serde_json::Value::Null;
        let trace = OpenAiAdapter::default()
            .trace_from_response(&response, &CallContext::default())
            .unwrap();
        assert_eq!(trace.output_message(), Some(""));
    }

    #[test]
    fn structured_output_is_carried() {
        let ctx = CallContext {
            structured_output: attest_contracts::trace::into_map(json!({ "refund_id": "RFD-001" })),
            ..Default::default()
        };
        let trace = OpenAiAdapter::default()
            .trace_from_response(&refund_response(), &ctx)
            .unwrap();
        assert_eq!(trace.output["structured"]["refund_id"], "RFD-001");
    }

    #[test]
    fn missing_choices_is_an_extraction_error() {
        let err = OpenAiAdapter::default()
            .trace_from_response(&json!({ "model": "gpt-4.1" }), &CallContext::default())
            .unwrap_err();
        match err {
            AttestError::Extraction { adapter, reason } => {
                assert_eq!(adapter, "openai");
                assert!(reason.contains("/choices/0/message"));
            }
            other => panic!("expected Extraction, got {other:?}"),
        }
    }
}
