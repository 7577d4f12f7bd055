//! # attest-core
//!
//! Trace capture and inspection for the Attest SDK.
//!
//! This crate provides:
//! - `TraceBuilder`, the only way live capture produces a `Trace`
//! - `TraceTree`, read-only navigation over nested multi-agent traces
//! - The `ProviderAdapter` trait every single-response adapter implements
//! - The flow-local simulation scope used by mock tools
//!
//! ## Usage
//!
//! ```rust,ignore
//! use attest_core::{StepSpec, TraceBuilder, TraceTree};
//! ```

pub mod adapter;
pub mod builder;
pub mod scope;
pub mod tree;

pub use adapter::{CallContext, ProviderAdapter, ToolCall};
pub use builder::{MetadataUpdate, StepSpec, TraceBuilder};
pub use scope::{MockToolRegistry, SimulationScope};
pub use tree::TraceTree;
