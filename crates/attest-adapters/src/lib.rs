//! # attest-adapters
//!
//! Concrete normalizers that turn provider and framework artifacts into
//! canonical Attest traces.
//!
//! - Single-response adapters (`OpenAiAdapter`, `AnthropicAdapter`,
//!   `GeminiAdapter`, `OllamaAdapter`) implement
//!   `attest_core::ProviderAdapter` over each vendor's JSON response.
//! - `ManualAdapter` hands out pre-tagged builders.
//! - `EventStreamHandler` pairs start/end instrumentation events.
//! - `SpanBatchAdapter` reads OpenTelemetry GenAI spans.

mod fields;

pub mod anthropic;
pub mod event_stream;
pub mod gemini;
pub mod manual;
pub mod ollama;
pub mod openai;
pub mod span_batch;

pub use anthropic::AnthropicAdapter;
pub use event_stream::{BuildOptions, EventStreamHandler, InstrumentationEvent};
pub use gemini::GeminiAdapter;
pub use manual::ManualAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use span_batch::{SpanBatchAdapter, SpanRecord};
