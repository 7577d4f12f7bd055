//! Trace capture from a framework's instrumentation event stream.
//!
//! Frameworks such as LlamaIndex report work as paired start/end events
//! rather than one response object. `EventStreamHandler` pairs them by
//! `call_id`, turns each completed pair into a step, and keeps session
//! aggregates (token total, last model, last completion) until
//! `build_trace` is asked for a trace.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use attest_contracts::{
    error::{AttestError, AttestResult},
    trace::{message_output, JsonMap, StepType, Trace},
};
use attest_core::{
    adapter::now_ms,
    builder::{MetadataUpdate, StepSpec, TraceBuilder},
};

const ADAPTER: &str = "event_stream";

/// A tool call embedded in a chat completion. `arguments` is the raw JSON
/// string the model produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// One document returned by a retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedNode {
    pub text: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub node_id: Option<String>,
}

/// The instrumentation events the handler understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InstrumentationEvent {
    ChatStart {
        call_id: String,
        #[serde(default)]
        model: Option<String>,
    },
    ChatEnd {
        call_id: String,
        #[serde(default)]
        completion: String,
        #[serde(default)]
        input_tokens: u64,
        #[serde(default)]
        output_tokens: u64,
        #[serde(default)]
        tool_calls: Vec<RawToolCall>,
    },
    RetrievalStart {
        call_id: String,
        query: String,
    },
    RetrievalEnd {
        call_id: String,
        #[serde(default)]
        nodes: Vec<RetrievedNode>,
    },
}

/// Caller-supplied facts for `build_trace`.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub query: Option<String>,
    pub response: Option<String>,
    pub latency_ms: Option<u64>,
    pub cost_usd: Option<f64>,
}

#[derive(Debug)]
struct PendingChat {
    model: Option<String>,
    started_at_ms: i64,
}

#[derive(Debug)]
struct PendingRetrieval {
    query: String,
    started_at_ms: i64,
}

/// Accumulates paired instrumentation events into trace steps.
#[derive(Debug, Default)]
pub struct EventStreamHandler {
    agent_id: Option<String>,
    pending_chats: HashMap<String, PendingChat>,
    pending_retrievals: HashMap<String, PendingRetrieval>,
    steps: Vec<(StepType, StepSpec)>,
    total_tokens: u64,
    chats_completed: usize,
    last_model: Option<String>,
    last_completion: Option<String>,
}

impl EventStreamHandler {
    pub fn new(agent_id: Option<String>) -> Self {
        Self {
            agent_id,
            ..Default::default()
        }
    }

    /// Number of steps recorded so far.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Session token total: input plus output of every completed chat.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Ingest one event.
    ///
    /// An end event whose `call_id` has no pending start is dropped with a
    /// warning. Fails only when an embedded tool call carries argument text
    /// that is not valid JSON; nothing from that event is recorded then.
    pub fn record(&mut self, event: InstrumentationEvent) -> AttestResult<()> {
        match event {
            InstrumentationEvent::ChatStart { call_id, model } => {
                if model.is_some() {
                    self.last_model = model.clone();
                }
                self.pending_chats.insert(
                    call_id,
                    PendingChat {
                        model,
                        started_at_ms: now_ms(),
                    },
                );
            }
            InstrumentationEvent::ChatEnd {
                call_id,
                completion,
                input_tokens,
                output_tokens,
                tool_calls,
            } => {
                let Some(pending) = self.pending_chats.remove(&call_id) else {
                    warn!(call_id = %call_id, "chat end without matching start, ignoring");
                    return Ok(());
                };
                let tools = tool_calls
                    .into_iter()
                    .map(|call| Ok((call.name, parse_arguments(&call.arguments)?)))
                    .collect::<AttestResult<Vec<_>>>()?;

                let mut args = JsonMap::new();
                if let Some(model) = pending.model {
                    args.insert("model".to_string(), Value::String(model));
                }
                let mut result = JsonMap::new();
                result.insert("completion".to_string(), Value::String(completion.clone()));
                result.insert("input_tokens".to_string(), Value::from(input_tokens));
                result.insert("output_tokens".to_string(), Value::from(output_tokens));

                self.steps.push((
                    StepType::LlmCall,
                    StepSpec::new("chat_completion")
                        .args(args)
                        .result(result)
                        .timing(pending.started_at_ms, now_ms()),
                ));
                for (name, args) in tools {
                    self.steps.push((StepType::ToolCall, StepSpec::new(name).args(args)));
                }

                self.total_tokens = self
                    .total_tokens
                    .saturating_add(input_tokens)
                    .saturating_add(output_tokens);
                self.chats_completed += 1;
                self.last_completion = Some(completion);
                debug!(call_id = %call_id, total_tokens = self.total_tokens, "chat recorded");
            }
            InstrumentationEvent::RetrievalStart { call_id, query } => {
                self.pending_retrievals.insert(
                    call_id,
                    PendingRetrieval {
                        query,
                        started_at_ms: now_ms(),
                    },
                );
            }
            InstrumentationEvent::RetrievalEnd { call_id, nodes } => {
                let Some(pending) = self.pending_retrievals.remove(&call_id) else {
                    warn!(call_id = %call_id, "retrieval end without matching start, ignoring");
                    return Ok(());
                };
                let mut args = JsonMap::new();
                args.insert("query".to_string(), Value::String(pending.query));
                let mut result = JsonMap::new();
                result.insert(
                    "nodes".to_string(),
                    Value::Array(nodes.iter().map(node_json).collect()),
                );
                self.steps.push((
                    StepType::Retrieval,
                    StepSpec::new("retrieve")
                        .args(args)
                        .result(result)
                        .timing(pending.started_at_ms, now_ms()),
                ));
            }
        }
        Ok(())
    }

    /// Assemble a trace from everything recorded so far.
    ///
    /// The handler keeps its state, so this may be called repeatedly; each
    /// call yields a trace with a fresh id.
    pub fn build_trace(&self, options: BuildOptions) -> AttestResult<Trace> {
        let mut builder = TraceBuilder::new(self.agent_id.clone());
        if let Some(query) = options.query {
            builder.set_input(message_output(query));
        }

        for (kind, spec) in &self.steps {
            let spec = spec.clone();
            match kind {
                StepType::LlmCall => builder.add_llm_call(spec),
                StepType::Retrieval => builder.add_retrieval(spec),
                _ => builder.add_tool_call(spec),
            };
        }

        let message = options
            .response
            .or_else(|| self.last_completion.clone())
            .unwrap_or_default();
        builder.set_output(message, None);
        builder.set_metadata(MetadataUpdate {
            total_tokens: (self.chats_completed > 0).then_some(self.total_tokens),
            cost_usd: options.cost_usd,
            latency_ms: options.latency_ms,
            model: self.last_model.clone(),
        });
        builder.build()
    }
}

fn parse_arguments(raw: &str) -> AttestResult<JsonMap> {
    if raw.trim().is_empty() {
        return Ok(JsonMap::new());
    }
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        AttestError::extraction(ADAPTER, format!("tool call arguments are not JSON: {e}"))
    })?;
    Ok(match value {
        Value::Object(map) => map,
        other => {
            let mut map = JsonMap::new();
            map.insert("value".to_string(), other);
            map
        }
    })
}

fn node_json(node: &RetrievedNode) -> Value {
    let mut map = JsonMap::new();
    map.insert("text".to_string(), Value::String(node.text.clone()));
    map.insert(
        "score".to_string(),
        node.score.map(Value::from).unwrap_or(Value::Null),
    );
    map.insert(
        "node_id".to_string(),
        node.node_id.clone().map(Value::String).unwrap_or(Value::Null),
    );
    Value::Object(map)
}

// ── Tests ────────────────────────────────────────────────────────────────────
