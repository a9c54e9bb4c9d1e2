//! The content module contract: the unit of work executed by the pipeline.
//!
//! A [`ContentModule`] produces one fragment of the final artifact plus a set
//! of shared-state writes. Module instances are cached singletons reused
//! across concurrent and sequential runs, so implementations must keep no
//! per-run state: everything a run needs flows through the
//! [`ModuleContext`] passed into [`execute`](ContentModule::execute).

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{CacheError, CacheLayer};
use crate::descriptor::ModuleId;
use crate::state::StateView;

/// A unit of content production.
///
/// Implementations must be stateless with respect to any single run: the same
/// instance is shared across runs, and sibling modules in a wave execute
/// concurrently. A module may suspend, typically on [`CacheLayer`] for a cold
/// key or on an external collaborator reached through it.
///
/// # Errors
///
/// Returning `Err` marks the module `Failure` for this run. Whether that
/// downgrades the whole run depends on the descriptor's `required` flag; the
/// rest of the wave always drains either way.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use promptloom::module::{ContentModule, ModuleContext, ModuleError, ModuleOutput};
/// use serde_json::json;
///
/// struct ScopeClause;
///
/// #[async_trait]
/// impl ContentModule for ScopeClause {
///     async fn execute(&self, ctx: ModuleContext) -> Result<ModuleOutput, ModuleError> {
///         let category = ctx.require("definition.category")?;
///         Ok(ModuleOutput::new()
///             .with_content(format!("Scope: applies to {category} definitions."))
///             .with_write("scope.resolved", json!(true)))
///     }
/// }
/// ```
#[async_trait]
pub trait ContentModule: Send + Sync {
    /// Execute this module against the run context.
    async fn execute(&self, ctx: ModuleContext) -> Result<ModuleOutput, ModuleError>;
}

/// Per-run execution context handed to a module.
///
/// The shared-state view is restricted to the keys the module declared in
/// `consumed_keys`; a key can be missing from the view either because it was
/// never declared or because its (optional) producer failed or was skipped.
#[derive(Clone)]
pub struct ModuleContext {
    /// Identifier of the executing module.
    pub module_id: ModuleId,
    /// Identifier of the enclosing pipeline run.
    pub run_id: String,
    /// Zero-based index of the wave this module executes in.
    pub wave: usize,
    state: StateView,
    cache: Arc<CacheLayer>,
}

impl ModuleContext {
    pub fn new(
        module_id: ModuleId,
        run_id: impl Into<String>,
        wave: usize,
        state: StateView,
        cache: Arc<CacheLayer>,
    ) -> Self {
        Self {
            module_id,
            run_id: run_id.into(),
            wave,
            state,
            cache,
        }
    }

    /// Read a consumed shared-state key, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Read a consumed shared-state key, failing with
    /// [`ModuleError::MissingInput`] when absent.
    pub fn require(&self, key: &str) -> Result<&Value, ModuleError> {
        self.state.get(key).ok_or_else(|| ModuleError::MissingInput {
            key: key.to_string(),
        })
    }

    /// The process-wide memoization layer.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }
}

/// The result of a successful module execution.
///
/// `content` is the artifact fragment (may be empty, in which case it
/// contributes no separator during assembly); `writes` are merged into shared
/// state at the wave barrier and become visible to later waves.
#[derive(Clone, Debug, Default)]
pub struct ModuleOutput {
    pub content: String,
    pub writes: FxHashMap<String, Value>,
}

impl ModuleOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_write(mut self, key: impl Into<String>, value: Value) -> Self {
        self.writes.insert(key.into(), value);
        self
    }
}

/// Errors surfaced by module execution.
#[derive(Debug, Error, Diagnostic)]
pub enum ModuleError {
    /// A consumed key was absent from the context view.
    #[error("missing expected input key: {key}")]
    #[diagnostic(
        code(promptloom::module::missing_input),
        help("Check that the producing module ran in an earlier wave and succeeded.")
    )]
    MissingInput { key: String },

    /// External collaborator failure.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(promptloom::module::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(promptloom::module::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Memoized computation failure propagated from the cache layer.
    #[error(transparent)]
    #[diagnostic(code(promptloom::module::cache))]
    Cache(#[from] CacheError),

    /// Catch-all execution failure.
    #[error("module execution failed: {0}")]
    #[diagnostic(code(promptloom::module::failed))]
    Failed(String),
}
