//! Attest demo CLI
//!
//! Builds, normalizes and evaluates agent traces with the Attest crates.
//! Every scenario except `evaluate` runs without an engine binary.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- multi-agent
//!   cargo run -p demo -- normalize --provider anthropic response.json
//!   cargo run -p demo -- events events.ndjson
//!   cargo run -p demo -- mock-tools
//!   cargo run -p demo -- evaluate --trace trace.json --assertions assertions.json

mod scenarios;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use attest_contracts::error::AttestResult;
use scenarios::{EvaluateArgs, Provider};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Attest: trace capture and assertion evaluation for AI agents.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Attest trace capture and evaluation demo",
    long_about = "Runs Attest demo scenarios showing trace building, multi-agent\n\
                  trees, provider normalization, mock tools and engine evaluation."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario that does not need the engine.
    RunAll,
    /// Build a three-level delegation trace and inspect it.
    MultiAgent,
    /// Normalize a provider response into a trace.
    Normalize {
        #[arg(long, value_enum, default_value = "openai")]
        provider: Provider,
        /// Response JSON file. Defaults to a built-in OpenAI sample.
        file: Option<PathBuf>,
    },
    /// Replay newline-delimited instrumentation events into a trace.
    Events {
        /// NDJSON file. Defaults to a built-in retrieval + chat sample.
        file: Option<PathBuf>,
    },
    /// Call mock tools inside a simulation scope.
    MockTools,
    /// Evaluate a trace against assertions with the engine.
    Evaluate {
        #[arg(long)]
        trace: PathBuf,
        #[arg(long)]
        assertions: PathBuf,
        /// Engine TOML configuration.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all(),
        Command::MultiAgent => scenarios::multi_agent(),
        Command::Normalize { provider, file } => scenarios::normalize(provider, file.as_deref()),
        Command::Events { file } => scenarios::events(file.as_deref()),
        Command::MockTools => scenarios::mock_tools(),
        Command::Evaluate {
            trace,
            assertions,
            config,
        } => scenarios::evaluate(&EvaluateArgs {
            trace,
            assertions,
            config,
        }),
    };

    match result {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

fn run_all() -> AttestResult<()> {
    scenarios::multi_agent()?;
    scenarios::normalize(Provider::Openai, None)?;
    scenarios::events(None)?;
    scenarios::mock_tools()?;
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("Attest: Agent Trace Evaluation");
    println!("==============================");
    println!();
    println!("Pipeline:");
    println!("  [1] Capture: builders and adapters produce canonical traces");
    println!("  [2] Compose: agent_call steps nest sub-traces into a tree");
    println!("  [3] Evaluate: the engine checks assertions over JSON-RPC on stdio");
    println!();
}
