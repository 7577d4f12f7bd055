//! Ollama `/api/chat` responses.

use serde_json::Value;

use attest_contracts::error::AttestResult;
use attest_core::adapter::{ProviderAdapter, ToolCall};

use crate::fields::{
    object_or_empty, optional_str, optional_u64, required, str_or_empty, sum_counts, tool_name,
};

const PROVIDER: &str = "ollama";

/// Reads a non-streaming chat response. Ollama reports prompt and
/// completion token counts separately; the trace total is their sum.
#[derive(Debug, Clone, Default)]
pub struct OllamaAdapter {
    agent_id: Option<String>,
}

impl OllamaAdapter {
    pub fn new(agent_id: Option<String>) -> Self {
        Self { agent_id }
    }
}

impl ProviderAdapter for OllamaAdapter {
    type Response = Value;

    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    fn extract_completion(&self, response: &Value) -> AttestResult<String> {
        let message = required(PROVIDER, response, "/message")?;
        str_or_empty(PROVIDER, message, "content")
    }

    fn extract_model(&self, response: &Value) -> Option<String> {
        optional_str(response, "/model")
    }

    fn extract_total_tokens(&self, response: &Value) -> Option<u64> {
        sum_counts(
            optional_u64(response, "/prompt_eval_count"),
            optional_u64(response, "/eval_count"),
        )
    }

    fn extract_tool_calls(&self, response: &Value) -> AttestResult<Vec<ToolCall>> {
        let message = required(PROVIDER, response, "/message")?;
        let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        calls
            .iter()
            .map(|call| {
                let name = tool_name(PROVIDER, call, "/function/name")?;
                let args = object_or_empty(call.pointer("/function/arguments"));
                Ok(ToolCall::new(name, Some(args)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use attest_contracts::error::AttestError;
    use attest_core::adapter::{CallContext, ProviderAdapter};

    use super::OllamaAdapter;

    #[test]
    fn chat_response_with_tool_call() {
        let response = json!({
            "model": "llama3.2",
            "created_at": "2025-01-01T00:00:00Z",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    { "function": { "name": "search_docs", "arguments": { "query": "refund policy" } } }
                ]
            },
            "done": true,
            "prompt_eval_count": 26,
            "eval_count": 18
        });

        let trace = OllamaAdapter::new(Some("local".into()))
            .trace_from_response(&response, &CallContext::default())
            .unwrap();

        assert_eq!(trace.steps.len(), 2);
        assert_eq!(trace.steps[1].args.as_ref().unwrap()["query"], "refund policy");
        assert_eq!(trace.metadata.as_ref().unwrap().total_tokens, Some(44));
    }

    #[test]
    fn missing_message_is_an_extraction_error() {
        let err = OllamaAdapter::default()
            .trace_from_response(&json!({ "model": "llama3.2", "done": true }), &CallContext::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("ollama extraction failed"));
        assert!(matches!(err, AttestError::Extraction { .. }));
    }
}
