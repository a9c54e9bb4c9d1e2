//! Run outcome types: per-module reports and the overall pipeline result.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::descriptor::ModuleId;

/// Terminal status of one module within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleStatus {
    /// Executed and returned output; its fragment is eligible for assembly.
    Success,
    /// Returned an error or panicked; excluded from assembly.
    Failure,
    /// Exceeded its execution budget; its (eventual) result was discarded.
    Timeout,
    /// Never dispatched, because the run deadline lapsed first.
    Skipped,
}

/// Execution metadata for one module in one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleReport {
    pub id: ModuleId,
    /// Zero-based index of the wave the module was planned into.
    pub wave: usize,
    pub status: ModuleStatus,
    pub duration: Duration,
    /// Error description for `Failure`/`Timeout` outcomes.
    pub error: Option<String>,
}

/// Overall status of a pipeline run.
///
/// Callers must inspect this before trusting the artifact: a
/// `PartialFailure` artifact is missing required content, a `Cancelled` one
/// stops at the last completed wave.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Every module either succeeded or was an optional casualty.
    Complete,
    /// A module marked `required` failed or timed out; the wave still
    /// drained, but the artifact is incomplete.
    PartialFailure,
    /// The run-level timeout lapsed; later waves were never dispatched.
    Cancelled,
    /// The requested module set could not be planned; no module executed.
    /// Surfaced as the `Err` branch of [`Pipeline::run`](crate::pipeline::Pipeline::run).
    Rejected,
}

/// Final result of one pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// The assembled artifact: successful fragments ordered by ascending
    /// priority, joined with blank lines.
    pub artifact: String,
    /// One report per planned module, in wave-plan order.
    pub reports: Vec<ModuleReport>,
    /// Snapshot of the run's shared state after the final barrier.
    pub shared_state: FxHashMap<String, Value>,
    pub status: RunStatus,
    pub wave_count: usize,
    pub total_duration: Duration,
}

impl PipelineResult {
    /// Report for one module, if it was part of the plan.
    #[must_use]
    pub fn report(&self, id: &ModuleId) -> Option<&ModuleReport> {
        self.reports.iter().find(|r| &r.id == id)
    }

    /// True only for a fully successful run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }
}
