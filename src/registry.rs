//! Module registration and singleton instance management.
//!
//! The registry is the validation gate for the whole pipeline: every graph
//! invariant that can be checked statically is checked here, at registration
//! time, so no run ever starts against a partially valid module set.
//! Registration order is independent of dependency order: forward references
//! are allowed and resolved by [`validate`](ModuleRegistry::validate) before
//! planning. A registration that closes a dependency cycle, or claims a
//! produced key some other descriptor already owns, is rejected on the spot.
//!
//! Module instances are lazily created, cached singletons. They are reused
//! across concurrent and sequential runs, which is why the module contract
//! forbids per-run state on the instance itself.

use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::descriptor::{ModuleDescriptor, ModuleId};
use crate::module::ContentModule;
use crate::resolver;

/// Factory producing the singleton instance for one descriptor.
pub type ModuleFactory = Box<dyn Fn() -> Arc<dyn ContentModule> + Send + Sync>;

/// Registration-time errors. All of these are fatal for pipeline
/// construction: the offending descriptor is not registered.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    /// A descriptor with this id is already registered.
    #[error("module \"{id}\" is already registered")]
    #[diagnostic(code(promptloom::registry::duplicate_module))]
    DuplicateModule { id: ModuleId },

    /// Two descriptors declared the same produced key.
    #[error(
        "produced key \"{key}\" declared by \"{incoming}\" is already owned by \"{existing}\""
    )]
    #[diagnostic(
        code(promptloom::registry::duplicate_key_producer),
        help("Each shared-state key may have exactly one producer; rename the key or merge the modules.")
    )]
    DuplicateKeyProducer {
        key: String,
        existing: ModuleId,
        incoming: ModuleId,
    },

    /// Registering this descriptor would close a dependency cycle.
    #[error("dependency cycle among modules: {}", unresolved.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", "))]
    #[diagnostic(
        code(promptloom::registry::cyclic_dependency),
        help("Break the cycle by removing one of the listed dependency edges.")
    )]
    CyclicDependency { unresolved: Vec<ModuleId> },

    /// A declared dependency resolves to no registered descriptor.
    #[error("module \"{module}\" depends on unregistered module \"{dependency}\"")]
    #[diagnostic(code(promptloom::registry::unknown_dependency))]
    UnknownDependency {
        module: ModuleId,
        dependency: ModuleId,
    },

    /// Lookup of a module id that was never registered.
    #[error("unknown module: \"{id}\"")]
    #[diagnostic(code(promptloom::registry::unknown_module))]
    UnknownModule { id: ModuleId },
}

struct ModuleEntry {
    descriptor: ModuleDescriptor,
    factory: ModuleFactory,
    instance: OnceLock<Arc<dyn ContentModule>>,
}

#[derive(Default)]
struct RegistryInner {
    entries: FxHashMap<ModuleId, Arc<ModuleEntry>>,
    producers: FxHashMap<String, ModuleId>,
    order: Vec<ModuleId>,
}

/// Holds module descriptors and their cached singleton instances.
#[derive(Default)]
pub struct ModuleRegistry {
    inner: RwLock<RegistryInner>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor together with the factory for its singleton
    /// instance.
    ///
    /// Fails fast with [`RegistryError::DuplicateModule`],
    /// [`RegistryError::DuplicateKeyProducer`], or, when this registration
    /// closes a cycle among already-registered descriptors,
    /// [`RegistryError::CyclicDependency`]. Dependencies on modules registered
    /// later are permitted; they are checked by [`validate`](Self::validate)
    /// before any plan is built.
    pub fn register(
        &self,
        descriptor: ModuleDescriptor,
        factory: impl Fn() -> Arc<dyn ContentModule> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        if inner.entries.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateModule {
                id: descriptor.id.clone(),
            });
        }

        for key in &descriptor.produced_keys {
            if let Some(existing) = inner.producers.get(key) {
                return Err(RegistryError::DuplicateKeyProducer {
                    key: key.clone(),
                    existing: existing.clone(),
                    incoming: descriptor.id.clone(),
                });
            }
        }

        // A cycle can only come into existence at the registration that closes
        // it, so checking the registered set plus the candidate catches it at
        // exactly that call.
        let mut descriptors: Vec<&ModuleDescriptor> =
            inner.entries.values().map(|e| &e.descriptor).collect();
        descriptors.push(&descriptor);
        if let Some(unresolved) = resolver::cycle_participants(&descriptors) {
            return Err(RegistryError::CyclicDependency { unresolved });
        }

        tracing::debug!(
            module = %descriptor.id,
            priority = descriptor.priority,
            dependencies = descriptor.dependencies.len(),
            "module registered"
        );

        for key in &descriptor.produced_keys {
            inner.producers.insert(key.clone(), descriptor.id.clone());
        }
        inner.order.push(descriptor.id.clone());
        let id = descriptor.id.clone();
        inner.entries.insert(
            id,
            Arc::new(ModuleEntry {
                descriptor,
                factory: Box::new(factory),
                instance: OnceLock::new(),
            }),
        );
        Ok(())
    }

    /// Check that every declared dependency resolves to a registered
    /// descriptor. Run before planning; forward references registered in any
    /// order pass, dangling ones fail here.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let inner = self.inner.read();
        for entry in inner.entries.values() {
            for dependency in &entry.descriptor.dependencies {
                if !inner.entries.contains_key(dependency) {
                    return Err(RegistryError::UnknownDependency {
                        module: entry.descriptor.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The lazily-created, cached singleton instance for `id`.
    pub fn instance(&self, id: &ModuleId) -> Result<Arc<dyn ContentModule>, RegistryError> {
        let entry = {
            let inner = self.inner.read();
            inner
                .entries
                .get(id)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownModule { id: id.clone() })?
        };
        Ok(entry.instance.get_or_init(|| (entry.factory)()).clone())
    }

    /// Clone of the descriptor registered under `id`.
    #[must_use]
    pub fn descriptor(&self, id: &ModuleId) -> Option<ModuleDescriptor> {
        self.inner.read().entries.get(id).map(|e| e.descriptor.clone())
    }

    /// All descriptors, in registration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).map(|e| e.descriptor.clone()))
            .collect()
    }

    /// Position of `id` in registration order; used as the final assembly
    /// tie-break.
    #[must_use]
    pub fn registration_index(&self, id: &ModuleId) -> Option<usize> {
        self.inner.read().order.iter().position(|o| o == id)
    }

    #[must_use]
    pub fn contains(&self, id: &ModuleId) -> bool {
        self.inner.read().entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.len())
            .finish()
    }
}
