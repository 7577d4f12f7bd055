//! Anthropic Messages API responses.

use serde_json::Value;

use attest_contracts::error::AttestResult;
use attest_core::adapter::{ProviderAdapter, ToolCall};

use crate::fields::{object_or_empty, optional_str, optional_u64, required_array, sum_counts, tool_name};

const PROVIDER: &str = "anthropic";

/// Reads a `message` object. Text blocks are joined with newlines; each
/// `tool_use` block becomes one tool call.
#[derive(Debug, Clone, Default)]
pub struct AnthropicAdapter {
    agent_id: Option<String>,
}

impl AnthropicAdapter {
    pub fn new(agent_id: Option<String>) -> Self {
        Self { agent_id }
    }
}

fn blocks_of_type<'a>(blocks: &'a [Value], kind: &'a str) -> impl Iterator<Item = &'a Value> {
    blocks
        .iter()
        .filter(move |b| b.get("type").and_then(Value::as_str) == Some(kind))
}

impl ProviderAdapter for AnthropicAdapter {
    type Response = Value;

    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    fn extract_completion(&self, response: &Value) -> AttestResult<String> {
        let blocks = required_array(PROVIDER, response, "/content")?;
        let parts: Vec<&str> = blocks_of_type(blocks, "text")
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();
        Ok(parts.join("\n"))
    }

    fn extract_model(&self, response: &Value) -> Option<String> {
        optional_str(response, "/model")
    }

    fn extract_total_tokens(&self, response: &Value) -> Option<u64> {
        sum_counts(
            optional_u64(response, "/usage/input_tokens"),
            optional_u64(response, "/usage/output_tokens"),
        )
    }

    fn extract_tool_calls(&self, response: &Value) -> AttestResult<Vec<ToolCall>> {
        let blocks = required_array(PROVIDER, response, "/content")?;
        blocks_of_type(blocks, "tool_use")
            .map(|block| {
                let name = tool_name(PROVIDER, block, "/name")?;
                Ok(ToolCall::new(name, Some(object_or_empty(block.get("input")))))
            })
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
