//! Capability negotiation types.
//!
//! Before any other request, the SDK declares the engine capabilities it
//! depends on. The engine answers with the subset it lacks; a non-empty
//! answer means the connection cannot be used.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The capability every SDK of this protocol generation requires.
pub const LAYERS_1_4: &str = "layers_1_4";

/// A named engine capability, e.g. `"layers_1_4"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(pub String);

impl Capability {
    /// Construct a capability from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The set of capabilities an SDK requires, or an engine supports.
///
/// Ordered so that the handshake request is byte-stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    inner: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Add a capability to this set.
    pub fn grant(&mut self, capability: Capability) {
        self.inner.insert(capability);
    }

    /// Return true if the set contains the given capability.
    pub fn has(&self, capability: &Capability) -> bool {
        self.inner.contains(capability)
    }

    /// Return an iterator over all capabilities, in sorted order.
    pub fn all(&self) -> impl Iterator<Item = &Capability> {
        self.inner.iter()
    }

    /// Capabilities in `self` that `supported` does not contain.
    pub fn missing_from(&self, supported: &CapabilitySet) -> Vec<String> {
        self.inner
            .iter()
            .filter(|c| !supported.has(c))
            .map(|c| c.0.clone())
            .collect()
    }

    /// The capability names, for the `initialize` request.
    pub fn names(&self) -> Vec<String> {
        self.inner.iter().map(|c| c.0.clone()).collect()
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(Capability::new).collect(),
        }
    }
}
