//! Wave-by-wave execution of a resolved plan.
//!
//! The runner walks the plan sequentially across waves and concurrently
//! within them: every module of a wave is dispatched onto the bounded worker
//! pool, and the runner joins all of them before touching the next wave. That
//! join is the wave barrier: it is what makes shared-state writes from wave
//! N visible to wave N+1 without any synchronization inside modules.
//!
//! Failures stay isolated. A wave always drains cooperatively: an erroring or
//! timed-out module never takes its siblings down, it only affects the run
//! status when its descriptor is marked required. Timed-out work is not
//! aborted; the runner merely stops waiting and discards whatever the task
//! eventually produces.

use futures_util::future::join_all;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tracing::Instrument;
use uuid::Uuid;

use crate::assembler::{ContentAssembler, Fragment};
use crate::cache::CacheLayer;
use crate::descriptor::{ModuleDescriptor, ModuleId};
use crate::module::{ModuleContext, ModuleOutput};
use crate::registry::ModuleRegistry;
use crate::resolver::WavePlan;
use crate::runtime::config::PipelineConfig;
use crate::runtime::report::{ModuleReport, ModuleStatus, PipelineResult, RunStatus};
use crate::state::SharedState;

/// Executes wave plans for one pipeline. Cheap to construct per run; the
/// worker pool and cache it borrows are shared across runs.
pub(crate) struct PipelineRunner<'a> {
    registry: &'a ModuleRegistry,
    config: &'a PipelineConfig,
    cache: Arc<CacheLayer>,
    workers: Arc<Semaphore>,
}

enum Disposition {
    Success(ModuleOutput),
    Failure(String),
    Timeout,
}

struct ModuleOutcome {
    id: ModuleId,
    descriptor: ModuleDescriptor,
    disposition: Disposition,
    duration: Duration,
}

impl<'a> PipelineRunner<'a> {
    pub(crate) fn new(
        registry: &'a ModuleRegistry,
        config: &'a PipelineConfig,
        cache: Arc<CacheLayer>,
        workers: Arc<Semaphore>,
    ) -> Self {
        Self {
            registry,
            config,
            cache,
            workers,
        }
    }

    /// Drive one run of the given plan to completion.
    pub(crate) async fn run(
        &self,
        plan: Arc<WavePlan>,
        initial_context: FxHashMap<String, Value>,
    ) -> PipelineResult {
        let run_id = Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now();
        let started = Instant::now();
        let deadline = self.config.run_timeout.map(|budget| started + budget);

        tracing::info!(
            run_id = %run_id,
            modules = plan.len(),
            waves = plan.wave_count(),
            "pipeline run started"
        );

        let mut state = SharedState::seeded(initial_context);
        let mut reports: Vec<ModuleReport> = Vec::with_capacity(plan.len());
        let mut fragments: Vec<Fragment> = Vec::new();
        let mut required_casualty = false;
        let mut cancelled = false;

        for (wave_index, wave) in plan.waves().iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(run_id = %run_id, wave = wave_index, "run deadline exceeded, halting dispatch");
                cancelled = true;
                for (later_index, later) in plan.waves().iter().enumerate().skip(wave_index) {
                    for id in later {
                        reports.push(ModuleReport {
                            id: id.clone(),
                            wave: later_index,
                            status: ModuleStatus::Skipped,
                            duration: Duration::ZERO,
                            error: None,
                        });
                    }
                }
                break;
            }

            let wave_span =
                tracing::info_span!("wave", run_id = %run_id, wave = wave_index, modules = wave.len());
            let outcomes = self
                .run_wave(&state, wave, wave_index, &run_id)
                .instrument(wave_span)
                .await;

            // Wave barrier: merge writes and record outcomes before the next
            // wave sees the state.
            for outcome in outcomes {
                let report = self.settle(outcome, &mut state, &mut fragments, wave_index);
                if report.status != ModuleStatus::Success && outcome_required(self.registry, &report)
                {
                    required_casualty = true;
                }
                reports.push(report);
            }
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else if required_casualty {
            RunStatus::PartialFailure
        } else {
            RunStatus::Complete
        };

        let artifact = ContentAssembler::new().assemble(fragments);
        let total_duration = started.elapsed();
        tracing::info!(
            run_id = %run_id,
            status = ?status,
            total_ms = total_duration.as_millis() as u64,
            "pipeline run finished"
        );

        PipelineResult {
            run_id,
            started_at,
            artifact,
            reports,
            shared_state: state.snapshot(),
            status,
            wave_count: plan.wave_count(),
            total_duration,
        }
    }

    /// Apply one module outcome at the barrier: merge writes, stage the
    /// fragment, and produce the report.
    fn settle(
        &self,
        outcome: ModuleOutcome,
        state: &mut SharedState,
        fragments: &mut Vec<Fragment>,
        wave_index: usize,
    ) -> ModuleReport {
        let ModuleOutcome {
            id,
            descriptor,
            disposition,
            duration,
        } = outcome;
        let registration_index = self
            .registry
            .registration_index(&id)
            .unwrap_or(usize::MAX);

        match disposition {
            Disposition::Success(output) => {
                state.merge_writes(&descriptor, output.writes);
                fragments.push(Fragment {
                    id: id.clone(),
                    priority: descriptor.priority,
                    wave: wave_index,
                    registration_index,
                    content: output.content,
                });
                ModuleReport {
                    id,
                    wave: wave_index,
                    status: ModuleStatus::Success,
                    duration,
                    error: None,
                }
            }
            Disposition::Failure(message) => {
                tracing::warn!(module = %id, error = %message, "module failed");
                self.stage_placeholder(&id, &descriptor, registration_index, wave_index, fragments);
                ModuleReport {
                    id,
                    wave: wave_index,
                    status: ModuleStatus::Failure,
                    duration,
                    error: Some(message),
                }
            }
            Disposition::Timeout => {
                tracing::warn!(module = %id, "module exceeded its execution budget");
                self.stage_placeholder(&id, &descriptor, registration_index, wave_index, fragments);
                ModuleReport {
                    id,
                    wave: wave_index,
                    status: ModuleStatus::Timeout,
                    duration,
                    error: Some("execution budget exceeded".to_string()),
                }
            }
        }
    }

    fn stage_placeholder(
        &self,
        id: &ModuleId,
        descriptor: &ModuleDescriptor,
        registration_index: usize,
        wave_index: usize,
        fragments: &mut Vec<Fragment>,
    ) {
        if self.config.include_failure_placeholders {
            fragments.push(Fragment {
                id: id.clone(),
                priority: descriptor.priority,
                wave: wave_index,
                registration_index,
                content: format!("[module {id} unavailable]"),
            });
        }
    }

    /// Dispatch every module of one wave and join them all.
    async fn run_wave(
        &self,
        state: &SharedState,
        wave: &[ModuleId],
        wave_index: usize,
        run_id: &str,
    ) -> Vec<ModuleOutcome> {
        let tasks = wave.iter().map(|id| {
            let id = id.clone();
            async move {
                let descriptor = match self.registry.descriptor(&id) {
                    Some(d) => d,
                    None => {
                        // Unreachable for plans built from this registry, but
                        // the wave must still drain with a full outcome set.
                        return ModuleOutcome {
                            descriptor: ModuleDescriptor::builder(id.clone()).build(),
                            id,
                            disposition: Disposition::Failure(
                                "module is not registered".to_string(),
                            ),
                            duration: Duration::ZERO,
                        };
                    }
                };
                let instance = match self.registry.instance(&id) {
                    Ok(instance) => instance,
                    Err(err) => {
                        return ModuleOutcome {
                            id,
                            descriptor,
                            disposition: Disposition::Failure(err.to_string()),
                            duration: Duration::ZERO,
                        };
                    }
                };

                let ctx = ModuleContext::new(
                    id.clone(),
                    run_id,
                    wave_index,
                    state.view_for(&descriptor),
                    self.cache.clone(),
                );
                let budget = descriptor.timeout.or(self.config.module_timeout);
                let workers = self.workers.clone();
                let span = tracing::info_span!("module", module = %id, wave = wave_index);
                let (began_tx, began_rx) = oneshot::channel();
                let handle = tokio::spawn(
                    async move {
                        let _permit = workers
                            .acquire_owned()
                            .await
                            .expect("worker pool semaphore is never closed");
                        let began = Instant::now();
                        let _ = began_tx.send(began);
                        let result = instance.execute(ctx).await;
                        (result, began.elapsed())
                    }
                    .instrument(span),
                );

                // The budget covers execution only; time spent queued for a
                // pool permit is not charged to the module.
                let began = began_rx.await.ok();
                let joined = match (budget, began) {
                    (Some(budget), Some(_)) => tokio::time::timeout(budget, handle).await,
                    _ => Ok(handle.await),
                };
                let (disposition, duration) = match joined {
                    // Budget hit: stop waiting, leave the task to finish on
                    // its own, discard whatever it returns.
                    Err(_) => (
                        Disposition::Timeout,
                        began.map(|t| t.elapsed()).unwrap_or_default(),
                    ),
                    Ok(Ok((Ok(output), duration))) => (Disposition::Success(output), duration),
                    Ok(Ok((Err(err), duration))) => {
                        (Disposition::Failure(err.to_string()), duration)
                    }
                    Ok(Err(join_err)) => (
                        Disposition::Failure(format!("module task panicked: {join_err}")),
                        began.map(|t| t.elapsed()).unwrap_or_default(),
                    ),
                };
                ModuleOutcome {
                    id,
                    descriptor,
                    disposition,
                    duration,
                }
            }
        });

        join_all(tasks).await
    }
}

fn outcome_required(registry: &ModuleRegistry, report: &ModuleReport) -> bool {
    report.status != ModuleStatus::Skipped
        && registry
            .descriptor(&report.id)
            .is_some_and(|d| d.required)
}
