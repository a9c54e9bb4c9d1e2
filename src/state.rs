//! Per-run shared state with a single producer per key.
//!
//! [`SharedState`] is exclusively owned by one pipeline run and lives exactly
//! as long as it. Concurrency safety comes from structure, not locks: the
//! single-producer-per-key invariant (enforced at registration) means two
//! modules never legally target the same key, and the wave barrier makes all
//! writes from wave N visible to wave N+1 before any module there starts.
//!
//! Modules never touch `SharedState` directly. They read through a
//! [`StateView`] restricted to their declared consumed keys and write by
//! returning a key/value set that the runner merges at the barrier, filtered
//! to their declared produced keys.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::descriptor::ModuleDescriptor;

/// Key/value context scoped to one pipeline run.
#[derive(Clone, Debug, Default)]
pub struct SharedState {
    values: FxHashMap<String, Value>,
}

impl SharedState {
    /// Create a run context pre-populated with the caller's initial values.
    #[must_use]
    pub fn seeded(initial: FxHashMap<String, Value>) -> Self {
        Self { values: initial }
    }

    /// Read a key. `None` is a legitimate outcome when the key's producer was
    /// optional and failed, was skipped, or has not run yet.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build the read view for one module: exactly the consumed keys that are
    /// currently present.
    #[must_use]
    pub fn view_for(&self, descriptor: &ModuleDescriptor) -> StateView {
        let mut values = FxHashMap::default();
        for key in &descriptor.consumed_keys {
            if let Some(value) = self.values.get(key) {
                values.insert(key.clone(), value.clone());
            }
        }
        StateView { values }
    }

    /// Merge a module's writes at the wave barrier.
    ///
    /// Only keys the writer declared in `produced_keys` are accepted; an
    /// undeclared write is dropped with a warning rather than failing the run,
    /// since declarations are the contract surface validated at registration.
    /// Keys are merged in sorted order so repeated runs observe an identical
    /// merge sequence.
    pub fn merge_writes(
        &mut self,
        descriptor: &ModuleDescriptor,
        writes: FxHashMap<String, Value>,
    ) {
        let mut pairs: Vec<_> = writes.into_iter().collect();
        pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, value) in pairs {
            if descriptor.produces_key(&key) {
                tracing::debug!(module = %descriptor.id, key = %key, "shared-state write");
                self.values.insert(key, value);
            } else {
                tracing::warn!(
                    module = %descriptor.id,
                    key = %key,
                    "dropping write to undeclared key"
                );
            }
        }
    }

    /// Clone the full map, e.g. for the final run result.
    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<String, Value> {
        self.values.clone()
    }
}

/// Immutable per-module read view over a run's shared state.
///
/// Restricted to the module's declared consumed keys; independent of later
/// mutations to the underlying [`SharedState`].
#[derive(Clone, Debug, Default)]
pub struct StateView {
    values: FxHashMap<String, Value>,
}

impl StateView {
    /// An empty view, for modules that consume nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
