//! Static module metadata: identifiers and descriptors.
//!
//! A [`ModuleDescriptor`] is created once at process startup from static
//! configuration and is immutable afterwards. It declares everything the
//! planner needs to know about a module without instantiating it: ordering
//! priority, dependencies, and the shared-state keys the module produces and
//! consumes.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Unique identifier of a content module within a registry.
///
/// Ordering is lexicographic and is used as the deterministic tie-break in
/// wave planning and cycle reporting.
///
/// # Examples
///
/// ```
/// use promptloom::descriptor::ModuleId;
///
/// let id = ModuleId::new("definition_header");
/// assert_eq!(id.as_str(), "definition_header");
/// assert_eq!(id, ModuleId::from("definition_header"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Immutable description of one content module.
///
/// Descriptors carry the static facts the planner and runner rely on:
///
/// - `priority`: assembly order of the emitted fragment, lower values are
///   emitted earlier in the final artifact.
/// - `dependencies`: module ids that must complete in a strictly earlier wave.
/// - `produced_keys`: shared-state keys this module may write. At most one
///   registered descriptor may claim a given key (single-producer invariant).
/// - `consumed_keys`: shared-state keys this module reads; its context view is
///   restricted to exactly these keys.
/// - `required`: whether a failure of this module downgrades the whole run to
///   `PartialFailure` instead of being silently excluded from assembly.
/// - `timeout`: optional per-module execution budget overriding the
///   pipeline-wide default.
///
/// # Examples
///
/// ```
/// use promptloom::descriptor::ModuleDescriptor;
/// use std::time::Duration;
///
/// let descriptor = ModuleDescriptor::builder("essential_elements")
///     .priority(20)
///     .depends_on(["definition_header"])
///     .produces(["essential_elements.count"])
///     .consumes(["definition.category"])
///     .required(true)
///     .timeout(Duration::from_secs(5))
///     .build();
///
/// assert_eq!(descriptor.id.as_str(), "essential_elements");
/// assert!(descriptor.required);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub id: ModuleId,
    pub priority: i32,
    pub dependencies: FxHashSet<ModuleId>,
    pub produced_keys: FxHashSet<String>,
    pub consumed_keys: FxHashSet<String>,
    pub required: bool,
    pub timeout: Option<Duration>,
}

impl ModuleDescriptor {
    /// Start building a descriptor for the given module id.
    pub fn builder(id: impl Into<ModuleId>) -> ModuleDescriptorBuilder {
        ModuleDescriptorBuilder {
            descriptor: ModuleDescriptor {
                id: id.into(),
                priority: 0,
                dependencies: FxHashSet::default(),
                produced_keys: FxHashSet::default(),
                consumed_keys: FxHashSet::default(),
                required: false,
                timeout: None,
            },
        }
    }

    /// True when `key` is declared in this descriptor's produced set.
    #[must_use]
    pub fn produces_key(&self, key: &str) -> bool {
        self.produced_keys.contains(key)
    }
}

/// Fluent builder for [`ModuleDescriptor`].
#[derive(Debug)]
pub struct ModuleDescriptorBuilder {
    descriptor: ModuleDescriptor,
}

impl ModuleDescriptorBuilder {
    /// Assembly priority; lower values are emitted earlier. Defaults to 0.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.descriptor.priority = priority;
        self
    }

    /// Declare dependencies that must complete in an earlier wave.
    #[must_use]
    pub fn depends_on<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ModuleId>,
    {
        self.descriptor
            .dependencies
            .extend(ids.into_iter().map(Into::into));
        self
    }

    /// Declare shared-state keys this module may write.
    #[must_use]
    pub fn produces<I, T>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.descriptor
            .produced_keys
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Declare shared-state keys this module reads.
    #[must_use]
    pub fn consumes<I, T>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.descriptor
            .consumed_keys
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Mark the module as required for a fully successful run.
    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.descriptor.required = required;
        self
    }

    /// Per-module execution budget overriding the pipeline default.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn build(self) -> ModuleDescriptor {
        self.descriptor
    }
}
