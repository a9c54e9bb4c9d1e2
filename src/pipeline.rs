//! The pipeline facade: registration, planning, and run orchestration.
//!
//! A [`Pipeline`] ties the long-lived pieces together (the module registry,
//! the memoized plan cache, the process-wide content cache, and the bounded
//! worker pool) and exposes the two entry points embedding applications use:
//! [`register_module`](Pipeline::register_module) and [`run`](Pipeline::run).
//! Runs are independent: each gets its own shared state and report set, while
//! the cache and module singletons are deliberately shared across them.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::cache::CacheLayer;
use crate::descriptor::{ModuleDescriptor, ModuleId};
use crate::module::ContentModule;
use crate::registry::{ModuleRegistry, RegistryError};
use crate::resolver::{PlanCache, ResolverError};
use crate::runtime::config::PipelineConfig;
use crate::runtime::report::{PipelineResult, RunStatus};
use crate::runtime::runner::PipelineRunner;

/// Errors that reject a run before any module executes.
///
/// These map to [`RunStatus::Rejected`]: planning failed, so there is no
/// partial artifact and no per-module reports.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolver(#[from] ResolverError),
}

impl PipelineError {
    /// The run status a rejection corresponds to.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        RunStatus::Rejected
    }
}

/// Orchestrates content modules into deterministic, concurrent runs.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use promptloom::descriptor::ModuleDescriptor;
/// use promptloom::module::{ContentModule, ModuleContext, ModuleError, ModuleOutput};
/// use promptloom::pipeline::Pipeline;
/// use promptloom::runtime::PipelineConfig;
///
/// struct Preamble;
///
/// #[async_trait]
/// impl ContentModule for Preamble {
///     async fn execute(&self, _ctx: ModuleContext) -> Result<ModuleOutput, ModuleError> {
///         Ok(ModuleOutput::new().with_content("You are a definition drafter."))
///     }
/// }
///
/// # async fn example() -> Result<(), promptloom::pipeline::PipelineError> {
/// let pipeline = Pipeline::new(PipelineConfig::default());
/// pipeline.register_module(
///     ModuleDescriptor::builder("preamble").priority(10).build(),
///     || Arc::new(Preamble),
/// )?;
///
/// let result = pipeline.run_all(Default::default()).await?;
/// assert!(result.is_complete());
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    registry: ModuleRegistry,
    config: PipelineConfig,
    cache: Arc<CacheLayer>,
    plans: PlanCache,
    workers: Arc<Semaphore>,
}

impl Pipeline {
    /// Build a pipeline with a fresh cache sized from `config`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let cache = Arc::new(CacheLayer::new(config.cache.max_entries));
        Self::with_cache(config, cache)
    }

    /// Build a pipeline over an existing cache, e.g. one shared with a
    /// [`RuleConfigStore`](crate::rules::RuleConfigStore) or another pipeline.
    #[must_use]
    pub fn with_cache(config: PipelineConfig, cache: Arc<CacheLayer>) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            registry: ModuleRegistry::new(),
            config,
            cache,
            plans: PlanCache::new(),
            workers,
        }
    }

    /// Register a module descriptor and its instance factory.
    ///
    /// See [`ModuleRegistry::register`] for the invariants enforced here.
    pub fn register_module(
        &self,
        descriptor: ModuleDescriptor,
        factory: impl Fn() -> Arc<dyn ContentModule> + Send + Sync + 'static,
    ) -> Result<(), PipelineError> {
        self.registry.register(descriptor, factory)?;
        Ok(())
    }

    /// Execute the requested modules (plus their transitive dependencies)
    /// against `initial_context`.
    ///
    /// The requested set is closed over dependencies before planning: asking
    /// for a module implicitly pulls in everything it needs, in earlier
    /// waves. Returns `Err` (a rejection, [`RunStatus::Rejected`]) when the
    /// set cannot be planned; once planning succeeds the run always yields a
    /// `PipelineResult`, whatever happens to individual modules.
    #[instrument(skip(self, initial_context), fields(requested = module_set.len()))]
    pub async fn run(
        &self,
        module_set: &[ModuleId],
        initial_context: FxHashMap<String, Value>,
    ) -> Result<PipelineResult, PipelineError> {
        self.registry.validate()?;

        let descriptors = self.close_over_dependencies(module_set)?;
        let mut fingerprint: Vec<ModuleId> = descriptors.iter().map(|d| d.id.clone()).collect();
        fingerprint.sort();
        let plan = self.plans.get_or_resolve(fingerprint, &descriptors)?;

        let runner = PipelineRunner::new(
            &self.registry,
            &self.config,
            self.cache.clone(),
            self.workers.clone(),
        );
        Ok(runner.run(plan, initial_context).await)
    }

    /// Execute every registered module. Equivalent to [`run`](Self::run) with
    /// the full module set.
    pub async fn run_all(
        &self,
        initial_context: FxHashMap<String, Value>,
    ) -> Result<PipelineResult, PipelineError> {
        let ids: Vec<ModuleId> = self
            .registry
            .descriptors()
            .into_iter()
            .map(|d| d.id)
            .collect();
        self.run(&ids, initial_context).await
    }

    /// The process-wide memoization layer backing this pipeline's runs.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Expand the requested ids into a closed descriptor set: every module
    /// reachable through dependency edges, each appearing once.
    fn close_over_dependencies(
        &self,
        module_set: &[ModuleId],
    ) -> Result<Vec<ModuleDescriptor>, PipelineError> {
        let mut seen: FxHashSet<ModuleId> = FxHashSet::default();
        let mut frontier: Vec<ModuleId> = module_set.to_vec();
        let mut descriptors: Vec<ModuleDescriptor> = Vec::new();

        while let Some(id) = frontier.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let descriptor = self
                .registry
                .descriptor(&id)
                .ok_or(RegistryError::UnknownModule { id })?;
            frontier.extend(descriptor.dependencies.iter().cloned());
            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("modules", &self.registry.len())
            .field("workers", &self.config.worker_pool_size)
            .finish()
    }
}
