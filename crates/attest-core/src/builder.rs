//! Incremental trace construction.
//!
//! `TraceBuilder` is the only way live capture produces a `Trace`. It owns
//! the running aggregates (token total, step list) while the agent executes,
//! and `build()` freezes them into an immutable value exactly once.
//!
//! Token accounting: every `add_llm_call` whose result carries a token count
//! adds to the running total. Recognized result fields, first match wins:
//!
//!   1. `tokens`
//!   2. `total_tokens`
//!   3. `input_tokens` + `output_tokens` (either may be absent)
//!
//! An explicit `set_metadata` with `total_tokens` replaces the running total.

use serde_json::Value;
use tracing::debug;

use attest_contracts::{
    error::{AttestError, AttestResult},
    trace::{generate_trace_id, message_output, JsonMap, Step, StepType, Trace, TraceMetadata},
};

/// The parts of a step the caller supplies to an `add_*` call.
#[derive(Debug, Clone, Default)]
pub struct StepSpec {
    name: String,
    args: Option<JsonMap>,
    result: Option<JsonMap>,
    metadata: Option<JsonMap>,
    started_at_ms: Option<i64>,
    ended_at_ms: Option<i64>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn args(mut self, args: JsonMap) -> Self {
        self.args = Some(args);
        self
    }

    pub fn maybe_args(mut self, args: Option<JsonMap>) -> Self {
        self.args = args;
        self
    }

    pub fn result(mut self, result: JsonMap) -> Self {
        self.result = Some(result);
        self
    }

    pub fn metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn timing(mut self, started_at_ms: i64, ended_at_ms: i64) -> Self {
        self.started_at_ms = Some(started_at_ms);
        self.ended_at_ms = Some(ended_at_ms);
        self
    }

    fn into_step(self, step_type: StepType) -> Step {
        Step {
            step_type,
            name: self.name,
            args: self.args,
            result: self.result,
            metadata: self.metadata,
            started_at_ms: self.started_at_ms,
            ended_at_ms: self.ended_at_ms,
            sub_trace: None,
        }
    }
}

/// Explicit trace-level metadata. `None` fields leave the builder's value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    pub total_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
    pub latency_ms: Option<u64>,
    pub model: Option<String>,
}

/// Mutable, single-owner accumulator for one agent execution.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    trace_id: Option<String>,
    agent_id: Option<String>,
    input: Option<JsonMap>,
    output: Option<JsonMap>,
    steps: Vec<Step>,
    metadata: TraceMetadata,
    /// Sum of token counts seen on llm_call results.
    accumulated_tokens: u64,
    saw_tokens: bool,
    tokens_overridden: bool,
    built: bool,
}

impl TraceBuilder {
    pub fn new(agent_id: Option<String>) -> Self {
        Self {
            agent_id,
            ..Default::default()
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    /// The steps recorded so far, in capture order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The running token total, ignoring any explicit override.
    pub fn accumulated_tokens(&self) -> u64 {
        self.accumulated_tokens
    }

    pub fn set_trace_id(&mut self, trace_id: impl Into<String>) -> &mut Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn set_input(&mut self, input: JsonMap) -> &mut Self {
        self.input = Some(input);
        self
    }

    /// Set the input to `{"user_message": message}`.
    pub fn set_input_message(&mut self, message: impl Into<String>) -> &mut Self {
        let mut input = JsonMap::new();
        input.insert("user_message".to_string(), Value::String(message.into()));
        self.set_input(input)
    }

    pub fn add_llm_call(&mut self, spec: StepSpec) -> &mut Self {
        if let Some(tokens) = spec.result.as_ref().and_then(extract_token_count) {
            self.accumulated_tokens = self.accumulated_tokens.saturating_add(tokens);
            self.saw_tokens = true;
        }
        self.steps.push(spec.into_step(StepType::LlmCall));
        self
    }

    pub fn add_tool_call(&mut self, spec: StepSpec) -> &mut Self {
        self.steps.push(spec.into_step(StepType::ToolCall));
        self
    }

    pub fn add_retrieval(&mut self, spec: StepSpec) -> &mut Self {
        self.steps.push(spec.into_step(StepType::Retrieval));
        self
    }

    /// Record a delegation to a sub-agent. The step takes ownership of `sub_trace`.
    ///
    /// Fails when the sub-trace (at any depth) reuses this builder's trace id,
    /// since that would make the delegation graph cyclic.
    pub fn add_agent_call(
        &mut self,
        name: impl Into<String>,
        sub_trace: Trace,
    ) -> AttestResult<&mut Self> {
        if let Some(own_id) = self.trace_id.as_deref() {
            if contains_trace_id(&sub_trace, own_id) {
                return Err(AttestError::structural(format!(
                    "sub-trace reuses ancestor trace id '{own_id}'"
                )));
            }
        }
        self.steps.push(Step::new(StepType::AgentCall, name).with_sub_trace(sub_trace));
        Ok(self)
    }

    /// Set the output to `{"message": message}`, plus `"structured"` when given.
    pub fn set_output(
        &mut self,
        message: impl Into<String>,
        structured: Option<JsonMap>,
    ) -> &mut Self {
        let mut output = message_output(message);
        if let Some(structured) = structured {
            output.insert("structured".to_string(), Value::Object(structured));
        }
        self.output = Some(output);
        self
    }

    /// Set the output map verbatim.
    pub fn set_output_map(&mut self, output: JsonMap) -> &mut Self {
        self.output = Some(output);
        self
    }

    pub fn set_metadata(&mut self, update: MetadataUpdate) -> &mut Self {
        if let Some(total) = update.total_tokens {
            self.metadata.total_tokens = Some(total);
            self.tokens_overridden = true;
        }
        if update.cost_usd.is_some() {
            self.metadata.cost_usd = update.cost_usd;
        }
        if update.latency_ms.is_some() {
            self.metadata.latency_ms = update.latency_ms;
        }
        if update.model.is_some() {
            self.metadata.model = update.model;
        }
        self
    }

    /// Finalize the trace.
    ///
    /// Applies the `{"message": ""}` output default and generates a trace id
    /// when none was set. Missing metadata is not an error.
    ///
    /// # Errors
    ///
    /// `Structural` if called a second time, if `cost_usd` is negative or not
    /// finite, or if a sub-trace reuses this trace's id.
    pub fn build(&mut self) -> AttestResult<Trace> {
        if self.built {
            return Err(AttestError::structural("build() called twice on the same TraceBuilder"));
        }

        if let Some(cost) = self.metadata.cost_usd {
            if !cost.is_finite() || cost < 0.0 {
                return Err(AttestError::structural(format!(
                    "cost_usd must be a non-negative number, got {cost}"
                )));
            }
        }

        let trace_id = self.trace_id.clone().unwrap_or_else(generate_trace_id);
        for step in &self.steps {
            if let Some(sub) = step.sub_trace.as_deref() {
                if contains_trace_id(sub, &trace_id) {
                    return Err(AttestError::structural(format!(
                        "step '{}' delegates to a trace that reuses ancestor id '{trace_id}'",
                        step.name
                    )));
                }
            }
        }

        let mut metadata = std::mem::take(&mut self.metadata);
        if !self.tokens_overridden && self.saw_tokens {
            metadata.total_tokens = Some(self.accumulated_tokens);
        }

        self.built = true;
        let trace = Trace {
            trace_id,
            agent_id: self.agent_id.clone(),
            input: self.input.take(),
            output: self.output.take().unwrap_or_else(|| message_output("")),
            steps: std::mem::take(&mut self.steps),
            metadata: (!metadata.is_empty()).then_some(metadata),
        };

        debug!(
            trace_id = %trace.trace_id,
            agent_id = ?trace.agent_id,
            steps = trace.steps.len(),
            "trace built"
        );
        Ok(trace)
    }
}

/// Read a token count from an llm_call result map.
pub fn extract_token_count(result: &JsonMap) -> Option<u64> {
    if let Some(tokens) = result.get("tokens").and_then(Value::as_u64) {
        return Some(tokens);
    }
    if let Some(tokens) = result.get("total_tokens").and_then(Value::as_u64) {
        return Some(tokens);
    }
    let input = result.get("input_tokens").and_then(Value::as_u64);
    let output = result.get("output_tokens").and_then(Value::as_u64);
    match (input, output) {
        (None, None) => None,
        (i, o) => Some(i.unwrap_or(0).saturating_add(o.unwrap_or(0))),
    }
}

/// True if `trace` or any trace nested beneath it has id `trace_id`.
fn contains_trace_id(trace: &Trace, trace_id: &str) -> bool {
    let mut stack = vec![trace];
    while let Some(current) = stack.pop() {
        if current.trace_id == trace_id {
            return true;
        }
        stack.extend(current.steps.iter().filter_map(|s| s.sub_trace.as_deref()));
    }
    false
}

// ── Tests ────────────────────────────────────────────────────────────────────
