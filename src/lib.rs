//! Promptloom: a concurrent pipeline orchestrator for composable content
//! modules.
//!
//! The crate turns a set of registered [`ContentModule`]s, each declaring
//! dependencies, priority, and the shared-state keys it produces and
//! consumes, into deterministic runs:
//!
//! 1. **Plan.** [`resolver`] topologically sorts descriptors into concurrency
//!    waves; every dependency sits in a strictly earlier wave.
//! 2. **Execute.** The runtime dispatches each wave onto a bounded worker
//!    pool and joins it fully (the wave barrier) before the next wave starts.
//!    Failures and timeouts are isolated per module.
//! 3. **Assemble.** Successful fragments are merged into one artifact in an
//!    order that is a pure function of the descriptors, never of scheduling.
//!
//! Shared state is single-producer-per-key and only mutated at wave barriers,
//! so modules need no synchronization of their own. Expensive lookups are
//! memoized process-wide by [`cache::CacheLayer`] with at-most-once
//! computation per key.
//!
//! # Quickstart
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use promptloom::descriptor::ModuleDescriptor;
//! use promptloom::module::{ContentModule, ModuleContext, ModuleError, ModuleOutput};
//! use promptloom::pipeline::Pipeline;
//! use promptloom::runtime::PipelineConfig;
//! use serde_json::json;
//!
//! struct CategoryHeader;
//!
//! #[async_trait]
//! impl ContentModule for CategoryHeader {
//!     async fn execute(&self, ctx: ModuleContext) -> Result<ModuleOutput, ModuleError> {
//!         let term = ctx.require("definition.term")?;
//!         Ok(ModuleOutput::new()
//!             .with_content(format!("Drafting a definition for {term}."))
//!             .with_write("header.emitted", json!(true)))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     promptloom::telemetry::init();
//!
//!     let pipeline = Pipeline::new(PipelineConfig::from_env());
//!     pipeline.register_module(
//!         ModuleDescriptor::builder("category-header")
//!             .priority(10)
//!             .consumes(["definition.term"])
//!             .produces(["header.emitted"])
//!             .build(),
//!         || Arc::new(CategoryHeader),
//!     )?;
//!
//!     let mut context = rustc_hash::FxHashMap::default();
//!     context.insert("definition.term".to_string(), json!("biological cell"));
//!     let result = pipeline.run_all(context).await?;
//!     println!("{}", result.artifact);
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod cache;
pub mod descriptor;
pub mod module;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod rules;
pub mod runtime;
pub mod state;
pub mod telemetry;

pub use descriptor::{ModuleDescriptor, ModuleId};
pub use module::{ContentModule, ModuleContext, ModuleError, ModuleOutput};
pub use pipeline::{Pipeline, PipelineError};
pub use runtime::{ModuleReport, ModuleStatus, PipelineConfig, PipelineResult, RunStatus};
