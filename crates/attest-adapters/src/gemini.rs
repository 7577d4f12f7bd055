//! Gemini `generateContent` responses.

use serde_json::Value;

use attest_contracts::error::AttestResult;
use attest_core::adapter::{ProviderAdapter, ToolCall};

use crate::fields::{object_or_empty, optional_str, optional_u64, required_array, tool_name};

const PROVIDER: &str = "gemini";
const PARTS: &str = "/candidates/0/content/parts";

/// Reads the first candidate. Text parts are concatenated; each part
/// carrying a `functionCall` becomes one tool call.
#[derive(Debug, Clone, Default)]
pub struct GeminiAdapter {
    agent_id: Option<String>,
}

impl GeminiAdapter {
    pub fn new(agent_id: Option<String>) -> Self {
        Self { agent_id }
    }
}

impl ProviderAdapter for GeminiAdapter {
    type Response = Value;

    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    fn extract_completion(&self, response: &Value) -> AttestResult<String> {
        let parts = required_array(PROVIDER, response, PARTS)?;
        Ok(parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect())
    }

    fn extract_model(&self, response: &Value) -> Option<String> {
        optional_str(response, "/modelVersion")
    }

    fn extract_total_tokens(&self, response: &Value) -> Option<u64> {
        optional_u64(response, "/usageMetadata/totalTokenCount")
    }

    fn extract_tool_calls(&self, response: &Value) -> AttestResult<Vec<ToolCall>> {
        let parts = required_array(PROVIDER, response, PARTS)?;
        parts
            .iter()
            .filter_map(|p| p.get("functionCall"))
            .map(|call| {
                let name = tool_name(PROVIDER, call, "/name")?;
                Ok(ToolCall::new(name, Some(object_or_empty(call.get("args")))))
            })
            .collect()
    }
}
