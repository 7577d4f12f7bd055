//! Flow-local simulation scope.
//!
//! Tests swap real tools for mocks and collect what the agent did into a
//! shared `TraceBuilder`. Both live in a `SimulationScope` installed for the
//! current thread only. Entering a scope returns a guard; dropping the guard
//! puts back whatever was active before, whether the block exits normally,
//! through `?`, or by unwinding.
//!
//! Threads never inherit a scope implicitly. `spawn` snapshots the caller's
//! scope at spawn time and installs that snapshot in the new thread, so
//! scopes entered later by the parent or by siblings are not observed.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex},
    thread::JoinHandle,
};

use serde_json::Value;
use tracing::{debug, warn};

use attest_contracts::{
    error::AttestResult,
    trace::{into_map, JsonMap},
};

use crate::builder::{StepSpec, TraceBuilder};

/// A mock implementation of a tool: receives the call args, returns the output.
pub type MockFn = Arc<dyn Fn(&Value) -> AttestResult<Value> + Send + Sync>;

/// A builder shared between the test harness and the code under test.
pub type SharedBuilder = Arc<Mutex<TraceBuilder>>;

thread_local! {
    static CURRENT: RefCell<Option<SimulationScope>> = const { RefCell::new(None) };
}

// ── MockToolRegistry ─────────────────────────────────────────────────────────

/// Named mock tools.
#[derive(Clone, Default)]
pub struct MockToolRegistry {
    tools: HashMap<String, MockFn>,
}

impl MockToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the mock for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Value) -> AttestResult<Value> + Send + Sync + 'static,
    {
        self.tools.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<MockFn> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Install a copy of this registry, with no active builder, for the
    /// current thread.
    pub fn enter(&self) -> ScopeGuard {
        SimulationScope::new(self.clone()).enter()
    }
}

impl fmt::Debug for MockToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("MockToolRegistry").field("tools", &names).finish()
    }
}

// ── SimulationScope ──────────────────────────────────────────────────────────

/// Everything a simulated run can see: its mocks and the builder it records into.
#[derive(Debug, Clone, Default)]
pub struct SimulationScope {
    pub mock_tools: MockToolRegistry,
    pub active_builder: Option<SharedBuilder>,
}

impl SimulationScope {
    pub fn new(mock_tools: MockToolRegistry) -> Self {
        Self {
            mock_tools,
            active_builder: None,
        }
    }

    pub fn with_builder(mut self, builder: SharedBuilder) -> Self {
        self.active_builder = Some(builder);
        self
    }

    /// Install this scope for the current thread until the guard drops.
    pub fn enter(self) -> ScopeGuard {
        let previous = CURRENT.with(|cell| cell.borrow_mut().replace(self));
        ScopeGuard {
            previous,
            _not_send: PhantomData,
        }
    }
}

/// Restores the previously active scope when dropped.
///
/// Not `Send`: a guard must be dropped on the thread that entered it.
#[must_use = "the scope is exited as soon as the guard is dropped"]
pub struct ScopeGuard {
    previous: Option<SimulationScope>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cell| *cell.borrow_mut() = previous);
    }
}

// ── Lookups ──────────────────────────────────────────────────────────────────

/// A snapshot of the current thread's scope, if any.
pub fn current() -> Option<SimulationScope> {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// The mock registered for `name` in the current thread's scope.
pub fn active_mock(name: &str) -> Option<MockFn> {
    CURRENT.with(|cell| cell.borrow().as_ref().and_then(|s| s.mock_tools.get(name)))
}

/// The builder of the current thread's scope.
pub fn active_builder() -> Option<SharedBuilder> {
    CURRENT.with(|cell| cell.borrow().as_ref().and_then(|s| s.active_builder.clone()))
}

/// Run the mock for `name` if the current scope has one.
///
/// Returns `Ok(None)` when no mock is registered, in which case the caller
/// runs the real tool. On success the call is also recorded as a `tool_call`
/// step on the active builder, if there is one.
pub fn call_mock_tool(name: &str, args: &Value) -> AttestResult<Option<Value>> {
    let Some(mock) = active_mock(name) else {
        return Ok(None);
    };
    let output = mock(args)?;
    debug!(tool = name, "mock tool called");

    if let Some(builder) = active_builder() {
        let mut result = JsonMap::new();
        result.insert("output".to_string(), output.clone());
        let spec = StepSpec::new(name).maybe_args(args_map(args)).result(result);
        match builder.lock() {
            Ok(mut b) => {
                b.add_tool_call(spec);
            }
            Err(_) => warn!(tool = name, "active builder lock poisoned, mock call not recorded"),
        }
    }
    Ok(Some(output))
}

fn args_map(args: &Value) -> Option<JsonMap> {
    match args {
        Value::Null => None,
        Value::Object(_) => into_map(args.clone()),
        other => {
            let mut map = JsonMap::new();
            map.insert("value".to_string(), other.clone());
            Some(map)
        }
    }
}

/// Spawn a thread that runs `f` inside the caller's scope as it is right now.
pub fn spawn<F, T>(f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let snapshot = current();
    std::thread::spawn(move || {
        let _guard = snapshot.map(SimulationScope::enter);
        f()
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────
