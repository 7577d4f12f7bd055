//! Hand-built traces for agents with no provider integration.

use attest_contracts::{error::AttestResult, trace::Trace};
use attest_core::builder::TraceBuilder;

/// Hands out builders pre-tagged with an agent id.
#[derive(Debug, Clone, Default)]
pub struct ManualAdapter {
    agent_id: Option<String>,
}

impl ManualAdapter {
    pub fn new(agent_id: Option<String>) -> Self {
        Self { agent_id }
    }

    pub fn create_builder(&self) -> TraceBuilder {
        TraceBuilder::new(self.agent_id.clone())
    }

    /// Run `f` against a fresh builder, then build it.
    ///
    /// `f` must not call `build()` itself.
    pub fn capture<F>(&self, f: F) -> AttestResult<Trace>
    where
        F: FnOnce(&mut TraceBuilder) -> AttestResult<()>,
    {
        let mut builder = self.create_builder();
        f(&mut builder)?;
        builder.build()
    }
}
