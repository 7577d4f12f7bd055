//! Read-only navigation over nested multi-agent traces.
//!
//! A delegation (`agent_call` step) owns its sub-agent's trace, so a root
//! trace is the root of a tree. `TraceTree` walks that tree in pre-order:
//! a trace's own steps are scanned in capture order, and each delegated
//! sub-trace is entered in the order its `agent_call` step appears, after the
//! parent's own steps have been scanned.
//!
//! Walks are iterative and track visited trace ids. Construction already
//! forbids cycles; a repeated id here means the value was assembled by hand
//! and is reported as a structural error instead of looping.

use std::collections::HashSet;

use attest_contracts::{
    error::{AttestError, AttestResult},
    trace::{Step, StepType, Trace},
};

/// A read-only view over a root trace and every trace it delegates to.
#[derive(Debug, Clone, Copy)]
pub struct TraceTree<'a> {
    root: &'a Trace,
}

impl<'a> TraceTree<'a> {
    pub fn new(root: &'a Trace) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &'a Trace {
        self.root
    }

    /// Every `(parent_agent, child_agent)` pair, in pre-order.
    ///
    /// Anonymous traces are labelled by their trace id.
    pub fn delegations(&self) -> AttestResult<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        self.walk(|trace| {
            for step in &trace.steps {
                if step.step_type != StepType::AgentCall {
                    continue;
                }
                if let Some(child) = step.sub_trace.as_deref() {
                    pairs.push((trace.agent_label().to_string(), child.agent_label().to_string()));
                }
            }
        })?;
        Ok(pairs)
    }

    /// Every `tool_call` step at any depth, in pre-order.
    pub fn all_tool_calls(&self) -> AttestResult<Vec<&'a Step>> {
        let mut calls = Vec::new();
        self.walk(|trace| calls.extend(trace.steps.iter().filter(|s| s.is_tool_call())))?;
        Ok(calls)
    }

    /// Agent labels of every trace in the tree, in pre-order.
    pub fn agents(&self) -> AttestResult<Vec<&'a str>> {
        let mut agents = Vec::new();
        self.walk(|trace| agents.push(trace.agent_label()))?;
        Ok(agents)
    }

    /// The first trace (pre-order) whose agent id is `agent_id`.
    pub fn find_agent(&self, agent_id: &str) -> AttestResult<Option<&'a Trace>> {
        let mut found = None;
        self.walk(|trace| {
            if found.is_none() && trace.agent_id.as_deref() == Some(agent_id) {
                found = Some(trace);
            }
        })?;
        Ok(found)
    }

    /// Maximum delegation depth. A trace with no delegations has depth 0.
    pub fn depth(&self) -> AttestResult<usize> {
        let mut max_depth = 0;
        let mut seen = HashSet::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((trace, depth)) = stack.pop() {
            visit(&mut seen, trace)?;
            max_depth = max_depth.max(depth);
            stack.extend(children(trace).map(|c| (c, depth + 1)));
        }
        Ok(max_depth)
    }

    /// Sum of `metadata.total_tokens` over every trace in the tree.
    pub fn total_tokens(&self) -> AttestResult<u64> {
        let mut total = 0u64;
        self.walk(|trace| {
            let tokens = trace.metadata.as_ref().and_then(|m| m.total_tokens).unwrap_or(0);
            total = total.saturating_add(tokens);
        })?;
        Ok(total)
    }

    /// Visit every trace in pre-order, failing if a trace id repeats.
    fn walk(&self, mut f: impl FnMut(&'a Trace)) -> AttestResult<()> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(trace) = stack.pop() {
            visit(&mut seen, trace)?;
            f(trace);
            // Reverse so the first delegation is popped first.
            let kids: Vec<&'a Trace> = children(trace).collect();
            stack.extend(kids.into_iter().rev());
        }
        Ok(())
    }
}

fn children(trace: &Trace) -> impl Iterator<Item = &Trace> {
    trace
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::AgentCall)
        .filter_map(|s| s.sub_trace.as_deref())
}

fn visit<'a>(seen: &mut HashSet<&'a str>, trace: &'a Trace) -> AttestResult<()> {
    if !seen.insert(trace.trace_id.as_str()) {
        return Err(AttestError::structural(format!(
            "trace id '{}' appears more than once in the delegation tree",
            trace.trace_id
        )));
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
