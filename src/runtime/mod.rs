//! Execution runtime: configuration, the wave runner, and run reports.
//!
//! The runtime layer turns a resolved [`WavePlan`](crate::resolver::WavePlan)
//! into a finished [`PipelineResult`]. It owns no policy of its own: pool
//! size, timeouts, and the failure policy all arrive through
//! [`PipelineConfig`] and the descriptors.

pub mod config;
pub mod report;
pub(crate) mod runner;

pub use config::{CacheConfig, PipelineConfig};
pub use report::{ModuleReport, ModuleStatus, PipelineResult, RunStatus};
