//! Demo scenarios. Each one builds or loads traces with the real Attest
//! components and prints what it produced.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::info;

use attest_adapters::{
    AnthropicAdapter, BuildOptions, EventStreamHandler, GeminiAdapter, InstrumentationEvent,
    ManualAdapter, OllamaAdapter, OpenAiAdapter,
};
use attest_contracts::{
    assertion::Assertion,
    error::{AttestError, AttestResult},
    trace::into_map,
    Trace,
};
use attest_core::{
    adapter::now_ms,
    scope::{self, SharedBuilder},
    CallContext, MetadataUpdate, MockToolRegistry, ProviderAdapter,
    SimulationScope, StepSpec, TraceBuilder, TraceTree,
};
use attest_engine::{EngineConfig, EngineProcessManager};

/// Which vendor shape a response file is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    Openai,
    Anthropic,
    Gemini,
    Ollama,
}

const SAMPLE_OPENAI_RESPONSE: &str = r#"{
  "model": "gpt-4.1-mini",
  "choices": [{
    "message": {
      "content": "Order ORD-1042 ships tomorrow.",
      "tool_calls": [
        { "function": { "name": "lookup_order", "arguments": "{\"order_id\":\"ORD-1042\"}" } }
      ]
    }
  }],
  "usage": { "total_tokens": 184 }
}"#;

const SAMPLE_EVENTS: &str = r#"
{"event":"retrieval_start","call_id":"r1","query":"refund policy"}
{"event":"retrieval_end","call_id":"r1","nodes":[{"text":"Refunds within 30 days.","score":0.91}]}
{"event":"chat_start","call_id":"c1","model":"llama3.1"}
{"event":"chat_end","call_id":"c1","completion":"You can get a refund within 30 days.","input_tokens":120,"output_tokens":24}
"#;

// ── Scenario 1: multi-agent trace tree ───────────────────────────────────────

/// Build orchestrator → researcher → writer and report the delegation tree.
pub fn multi_agent() -> AttestResult<()> {
    println!("=== Scenario: Multi-agent trace tree ===");
    println!();

    let writer = ManualAdapter::new(Some("writer".into())).capture(|b| {
        b.set_input_message("Draft a summary of the findings");
        b.add_llm_call(
            StepSpec::new("draft").result(object(json!({ "completion": "Summary...", "tokens": 150 }))),
        );
        b.add_tool_call(StepSpec::new("write_doc").args(object(json!({ "path": "summary.md" }))));
        b.set_output("Summary written to summary.md", None);
        Ok(())
    })?;

    let mut researcher = TraceBuilder::new(Some("researcher".into()));
    researcher
        .set_input_message("Research the Q3 churn drivers")
        .add_tool_call(StepSpec::new("search_web").args(object(json!({ "q": "Q3 churn" }))))
        .add_llm_call(
            StepSpec::new("analyze").result(object(json!({ "completion": "Pricing.", "tokens": 250 }))),
        );
    researcher.add_agent_call("delegate_writer", writer)?;
    researcher.set_output("Pricing changes drove churn", None);
    let researcher = researcher.build()?;

    let mut orchestrator = TraceBuilder::new(Some("orchestrator".into()));
    orchestrator
        .set_input_message("Why did churn rise in Q3?")
        .add_tool_call(StepSpec::new("fetch_context"))
        .add_llm_call(
            StepSpec::new("plan").result(object(json!({ "completion": "Delegate.", "tokens": 200 }))),
        );
    orchestrator.add_agent_call("delegate_researcher", researcher)?;
    orchestrator
        .set_output("Churn rose because of the pricing change", None)
        .set_metadata(MetadataUpdate {
            cost_usd: Some(0.0042),
            latency_ms: Some(3_100),
            model: Some("gpt-4.1".into()),
            ..Default::default()
        });
    let trace = orchestrator.build()?;

    let tree = TraceTree::new(&trace);
    let tools: Vec<&str> = tree.all_tool_calls()?.iter().map(|s| s.name.as_str()).collect();
    let delegations: Vec<String> = tree
        .delegations()?
        .into_iter()
        .map(|(parent, child)| format!("{parent} -> {child}"))
        .collect();

    println!("  Agents:       {}", tree.agents()?.join(", "));
    println!("  Delegations:  {}", delegations.join(", "));
    println!("  Tool calls:   {}", tools.join(", "));
    println!("  Depth:        {}", tree.depth()?);
    println!("  Total tokens: {}", tree.total_tokens()?);
    println!();
    print_json(&trace)?;
    Ok(())
}

// ── Scenario 2: provider response normalization ──────────────────────────────

/// Normalize a provider response file, or the built-in OpenAI sample.
pub fn normalize(provider: Provider, file: Option<&Path>) -> AttestResult<()> {
    println!("=== Scenario: Provider response normalization ({provider:?}) ===");
    println!();

    let raw = match file {
        Some(path) => read_file(path)?,
        None if provider == Provider::Openai => SAMPLE_OPENAI_RESPONSE.to_string(),
        None => {
            return Err(AttestError::Usage {
                reason: format!("no built-in sample for {provider:?}; pass a response file"),
            })
        }
    };
    let response: Value = parse_json(&raw, "provider response")?;

    let started = now_ms();
    let context = CallContext {
        input_messages: vec![json!({ "role": "user", "content": "Where is my order?" })],
        started_at_ms: Some(started),
        ended_at_ms: Some(now_ms()),
        ..Default::default()
    };

    let agent = Some("demo-agent".to_string());
    let trace = match provider {
        Provider::Openai => OpenAiAdapter::new(agent).trace_from_response(&response, &context)?,
        Provider::Anthropic => {
            AnthropicAdapter::new(agent).trace_from_response(&response, &context)?
        }
        Provider::Gemini => GeminiAdapter::new(agent).trace_from_response(&response, &context)?,
        Provider::Ollama => OllamaAdapter::new(agent).trace_from_response(&response, &context)?,
    };

    info!(trace_id = %trace.trace_id, steps = trace.steps.len(), "response normalized");
    print_json(&trace)?;
    Ok(())
}

// ── Scenario 3: instrumentation event stream ─────────────────────────────────

/// Replay newline-delimited instrumentation events into one trace.
pub fn events(file: Option<&Path>) -> AttestResult<()> {
    println!("=== Scenario: Instrumentation event stream ===");
    println!();

    let raw = match file {
        Some(path) => read_file(path)?,
        None => SAMPLE_EVENTS.to_string(),
    };

    let mut handler = EventStreamHandler::new(Some("rag-agent".into()));
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let event: InstrumentationEvent = parse_json(line, "instrumentation event")?;
        handler.record(event)?;
    }

    let trace = handler.build_trace(BuildOptions {
        query: Some("What is the refund policy?".into()),
        ..Default::default()
    })?;

    println!("  Steps recorded: {}", handler.step_count());
    println!("  Total tokens:   {}", handler.total_tokens());
    println!();
    print_json(&trace)?;
    Ok(())
}

// ── Scenario 4: mocked tools inside a simulation scope ───────────────────────

/// Run an agent body against mock tools and capture the calls it makes.
pub fn mock_tools() -> AttestResult<()> {
    println!("=== Scenario: Mock tools in a simulation scope ===");
    println!();

    let mut mocks = MockToolRegistry::new();
    mocks
        .register("lookup_order", |args| {
            let id = args.get("order_id").and_then(Value::as_str).unwrap_or("unknown");
            Ok(json!({ "order_id": id, "status": "shipped" }))
        })
        .register("refund", |_| Ok(json!({ "refunded": false, "reason": "outside window" })));

    let builder: SharedBuilder = Arc::new(Mutex::new(TraceBuilder::new(Some("support-agent".into()))));
    {
        let _guard = SimulationScope::new(mocks).with_builder(builder.clone()).enter();

        let order = scope::call_mock_tool("lookup_order", &json!({ "order_id": "ORD-7" }))?;
        println!("  lookup_order -> {}", order.unwrap_or(Value::Null));

        // The worker inherits the scope as it was at spawn time.
        let refund = scope::spawn(|| scope::call_mock_tool("refund", &json!({ "order_id": "ORD-7" })))
            .join()
            .map_err(|_| AttestError::Usage { reason: "worker thread panicked".into() })??;
        println!("  refund       -> {}", refund.unwrap_or(Value::Null));

        let unmocked = scope::call_mock_tool("send_email", &json!({}))?;
        println!("  send_email   -> {}", if unmocked.is_some() { "mocked" } else { "not mocked" });
    }
    println!("  Scope active after exit: {}", scope::current().is_some());
    println!();

    let trace = {
        let mut builder = builder
            .lock()
            .map_err(|_| AttestError::Usage { reason: "trace builder lock poisoned".into() })?;
        builder.set_output("Order ORD-7 has shipped", None);
        builder.build()?
    };
    print_json(&trace)?;
    Ok(())
}

// ── Scenario 5: engine evaluation ────────────────────────────────────────────

/// Arguments for `evaluate`.
#[derive(Debug, Clone)]
pub struct EvaluateArgs {
    pub trace: PathBuf,
    pub assertions: PathBuf,
    pub config: Option<PathBuf>,
}

/// Start the engine, evaluate one trace against an assertion file, stop it.
pub fn evaluate(args: &EvaluateArgs) -> AttestResult<()> {
    println!("=== Scenario: Engine evaluation ===");
    println!();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    }
    .apply_env()?;

    let trace: Trace = parse_json(&read_file(&args.trace)?, "trace")?;
    let assertions: Vec<Assertion> = parse_json(&read_file(&args.assertions)?, "assertions")?;
    println!("  Trace:      {} ({} steps)", trace.trace_id, trace.steps.len());
    println!("  Assertions: {}", assertions.len());
    println!();

    let results = EngineProcessManager::scoped(config, |engine| {
        if let Some(init) = engine.init_result() {
            println!("  Engine {} ready", init.engine_version);
        }
        engine.evaluate_batch(&trace, &assertions)
    })?;

    let mut failed = 0;
    for result in &results.results {
        let mark = if result.passed() { "PASS" } else { "FAIL" };
        if !result.passed() {
            failed += 1;
        }
        println!("  [{mark}] {}  {}", result.assertion_id, result.explanation);
    }
    println!();
    println!(
        "  {} passed, {failed} failed, cost ${:.4}, {} ms",
        results.results.len() - failed,
        results.total_cost,
        results.total_duration_ms
    );

    if failed > 0 {
        return Err(AttestError::Usage {
            reason: format!("{failed} assertion(s) failed"),
        });
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn object(value: Value) -> attest_contracts::JsonMap {
    into_map(value).unwrap_or_default()
}

fn read_file(path: &Path) -> AttestResult<String> {
    fs::read_to_string(path).map_err(|e| AttestError::Usage {
        reason: format!("cannot read '{}': {e}", path.display()),
    })
}

fn parse_json<T: DeserializeOwned>(text: &str, what: &str) -> AttestResult<T> {
    serde_json::from_str(text).map_err(|e| AttestError::Serialization {
        reason: format!("invalid {what}: {e}"),
    })
}

fn print_json(trace: &Trace) -> AttestResult<()> {
    let text = serde_json::to_string_pretty(trace).map_err(|e| AttestError::Serialization {
        reason: e.to_string(),
    })?;
    println!("{text}");
    println!();
    Ok(())
}
