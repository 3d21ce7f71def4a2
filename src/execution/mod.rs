//! Pipeline orchestrator.
//!
//! Runs the units of work (two cleaning units, four aggregation units, four publish units) on a
//! bounded rayon pool, in dependency order:
//!
//! - a unit starts once every dependency has succeeded (atomic countdown per unit)
//! - in-flight units are capped by a semaphore, on top of the worker count
//! - each unit is wrapped in a [`RetryPolicy`]; only transient failures are retried
//! - a failed unit skips its transitive dependents; independent siblings keep running
//! - cancellation stops new units from starting; running units finish
//!
//! Every run yields a [`RunReport`], whether or not units failed.

mod observer;
pub mod report;
mod retry;
mod semaphore;
mod unit;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use rayon::{Scope, ThreadPool, ThreadPoolBuilder};

use crate::aggregation::run_aggregate;
use crate::cleaning::{run_clean_customers, run_clean_purchases};
use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::publish::run_publish;

pub use observer::{
    CompositeObserver, PipelineEvent, PipelineMetrics, PipelineMetricsSnapshot, PipelineObserver,
    TracingObserver,
};
pub use report::{RunReport, RunStatus, SkipReason, UnitOutput, UnitReport, UnitStatus};
pub use retry::RetryPolicy;
pub use unit::{RunOptions, Stage, UnitId};

use semaphore::Semaphore;

/// Worker pool sizing for the [`Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Worker threads.
    pub workers: usize,
    /// Upper bound on concurrently executing units.
    pub max_in_flight_units: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            workers: n,
            max_in_flight_units: n,
        }
    }
}

/// Cooperative cancellation flag shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run scheduling state shared by the pool workers.
struct RunState {
    options: RunOptions,
    cancel: CancellationToken,
    units: Vec<UnitId>,
    dependents: Vec<Vec<usize>>,
    pending: Vec<AtomicUsize>,
    reports: Vec<OnceLock<UnitReport>>,
    slots: Semaphore,
}

impl RunState {
    fn new(options: RunOptions, cancel: CancellationToken, max_in_flight: usize) -> Self {
        let units = options.plan();
        let index_of = |u: UnitId| units.iter().position(|x| *x == u);

        let mut dependents = vec![Vec::new(); units.len()];
        let mut pending = Vec::with_capacity(units.len());
        for (idx, unit) in units.iter().enumerate() {
            let deps: Vec<usize> = unit.dependencies().into_iter().filter_map(index_of).collect();
            for &d in &deps {
                dependents[d].push(idx);
            }
            pending.push(AtomicUsize::new(deps.len()));
        }

        Self {
            options,
            cancel,
            reports: units.iter().map(|_| OnceLock::new()).collect(),
            units,
            dependents,
            pending,
            slots: Semaphore::new(max_in_flight),
        }
    }

    fn roots(&self) -> Vec<usize> {
        (0..self.units.len())
            .filter(|&i| self.pending[i].load(Ordering::SeqCst) == 0)
            .collect()
    }
}

/// Dependency-ordered executor for the cleaning, aggregation and publish units.
pub struct Pipeline {
    ctx: PipelineContext,
    pool: ThreadPool,
    opts: ExecutionOptions,
    retry: RetryPolicy,
    observer: Option<Arc<dyn PipelineObserver>>,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Create a pipeline over `ctx` with its own worker pool.
    pub fn new(ctx: PipelineContext, opts: ExecutionOptions) -> PipelineResult<Self> {
        if opts.workers == 0 || opts.max_in_flight_units == 0 {
            return Err(PipelineError::Config {
                message: "workers and max_in_flight_units must be > 0".to_string(),
            });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(opts.workers)
            .thread_name(|i| format!("pipeline-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::Config {
                message: format!("failed to build worker pool: {e}"),
            })?;

        Ok(Self {
            ctx,
            pool,
            opts,
            retry: RetryPolicy::default(),
            observer: None,
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach an observer for orchestrator events.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Handle to real-time run metrics.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run the planned units to completion.
    pub fn run(&self, options: &RunOptions) -> PipelineResult<RunReport> {
        self.run_with_cancel(options, &CancellationToken::new())
    }

    /// Run the planned units until done or until `cancel` fires.
    ///
    /// Returns `Err` only for invalid options; unit failures are reported in the [`RunReport`].
    pub fn run_with_cancel(
        &self,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> PipelineResult<RunReport> {
        options.validate()?;
        let start = Instant::now();
        let state = RunState::new(*options, cancel.clone(), self.opts.max_in_flight_units);

        self.metrics.begin_run();
        self.emit(PipelineEvent::RunStarted {
            units: state.units.len(),
        });

        self.pool.scope(|scope| {
            for idx in state.roots() {
                self.dispatch(scope, &state, idx);
            }
        });

        let units = self.collect_reports(state);
        let elapsed = start.elapsed();
        let report = RunReport::new(units, elapsed);

        let summary = report.publish_summary();
        if summary.collections > 0 {
            tracing::info!(
                collections = summary.collections,
                total_rows = summary.total_rows,
                total_elapsed_ms = summary.total_elapsed.as_millis() as u64,
                "publish summary"
            );
        }

        self.metrics.end_run(elapsed);
        self.emit(PipelineEvent::RunFinished {
            status: report.status,
            elapsed,
            metrics: self.metrics.snapshot(),
        });
        Ok(report)
    }

    fn dispatch<'s>(&'s self, scope: &Scope<'s>, state: &'s RunState, idx: usize) {
        scope.spawn(move |scope| {
            if !self.run_unit(state, idx) {
                return;
            }
            for &next in &state.dependents[idx] {
                if state.pending[next].fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.dispatch(scope, state, next);
                }
            }
        });
    }

    /// Execute one unit and record its report. Returns `true` if dependents may start.
    fn run_unit(&self, state: &RunState, idx: usize) -> bool {
        let unit = state.units[idx];
        if state.cancel.is_cancelled() {
            self.skip(state, idx, SkipReason::Cancelled);
            return false;
        }

        let (_permit, waited) = state.slots.acquire();
        if !waited.is_zero() {
            self.metrics.on_throttle_wait(waited);
            self.emit(PipelineEvent::ThrottleWaited {
                unit,
                duration: waited,
            });
        }

        self.metrics.on_unit_start();
        let start = Instant::now();
        let reuse = state.options.reuses(unit);
        let (result, attempts) = self.retry.run(
            |attempt| {
                self.emit(PipelineEvent::UnitStarted { unit, attempt });
                self.execute(unit, reuse)
            },
            |attempt, err, delay| {
                self.metrics.on_retry();
                self.emit(PipelineEvent::UnitRetrying {
                    unit,
                    attempt,
                    delay,
                    error: err.to_string(),
                });
            },
        );

        let elapsed = start.elapsed();
        let report = match result {
            Ok(output) => {
                let status = if reuse {
                    UnitStatus::Reused
                } else {
                    UnitStatus::Succeeded
                };
                UnitReport::finished(unit, status, attempts, elapsed, output)
            }
            Err(e) => UnitReport::failed(unit, attempts, elapsed, &e),
        };

        let ok = report.status.is_success();
        self.metrics.on_unit_end(ok);
        self.emit(PipelineEvent::UnitFinished {
            report: report.clone(),
        });
        let _ = state.reports[idx].set(report);
        ok
    }

    fn skip(&self, state: &RunState, idx: usize, reason: SkipReason) {
        let unit = state.units[idx];
        self.metrics.on_unit_skipped();
        self.emit(PipelineEvent::UnitSkipped { unit, reason });
        let _ = state.reports[idx].set(UnitReport::skipped(unit, reason));
    }

    fn execute(&self, unit: UnitId, reuse: bool) -> PipelineResult<Option<UnitOutput>> {
        if reuse {
            self.verify_checkpoint(unit)?;
            return Ok(None);
        }
        let ctx = &self.ctx;
        let output = match unit {
            UnitId::CleanCustomers => UnitOutput::from(run_clean_customers(ctx)?),
            UnitId::CleanPurchases => UnitOutput::from(run_clean_purchases(ctx)?),
            UnitId::Aggregate(view) => UnitOutput::from(run_aggregate(ctx, view)?),
            UnitId::Publish(view) => UnitOutput::from(run_publish(ctx, view)?),
        };
        Ok(Some(output))
    }

    fn verify_checkpoint(&self, unit: UnitId) -> PipelineResult<()> {
        let Some((bucket, key)) = unit.checkpoint(&self.ctx.layout) else {
            return Ok(());
        };
        if self.ctx.objects.exists(bucket, key)? {
            Ok(())
        } else {
            Err(PipelineError::not_found(bucket, key))
        }
    }

    /// Final reports in plan order; units that never ran are marked skipped.
    fn collect_reports(&self, state: RunState) -> Vec<UnitReport> {
        let mut out: Vec<UnitReport> = Vec::with_capacity(state.units.len());
        for (idx, unit) in state.units.iter().copied().enumerate() {
            if let Some(report) = state.reports[idx].get() {
                out.push(report.clone());
                continue;
            }
            // Dependencies precede the unit in plan order, so their reports are final.
            let reason = unit
                .dependencies()
                .into_iter()
                .filter_map(|dep| out.iter().find(|r| r.unit == dep))
                .find(|r| !r.status.is_success())
                .map(|r| match r.status {
                    UnitStatus::Skipped {
                        reason: SkipReason::Cancelled,
                    } => SkipReason::Cancelled,
                    _ => SkipReason::UpstreamFailed { unit: r.unit },
                })
                .unwrap_or(SkipReason::Cancelled);
            self.metrics.on_unit_skipped();
            self.emit(PipelineEvent::UnitSkipped { unit, reason });
            out.push(UnitReport::skipped(unit, reason));
        }
        out
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaning::load_raw;
    use crate::records::ViewKind;

    const CUSTOMERS: &[u8] = b"id_client,nom,email,date_inscription,pays\n\
        10,Ada,ada@example.com,2023-01-01,FR\n\
        11,Bob,bob@example.com,2023-02-01,BE\n";
    const PURCHASES: &[u8] = b"id_achat,id_client,produit,montant,date_achat\n\
        1,10,A,50,2024-01-05 10:00:00\n\
        2,11,B,20,2024-01-06 11:00:00\n";

    fn pipeline(ctx: PipelineContext) -> Pipeline {
        Pipeline::new(
            ctx,
            ExecutionOptions {
                workers: 2,
                max_in_flight_units: 2,
            },
        )
        .unwrap()
        .with_retry_policy(RetryPolicy::immediate(3))
    }

    #[test]
    fn full_run_succeeds_and_reports_every_unit() {
        let ctx = PipelineContext::in_memory();
        load_raw(&ctx, CUSTOMERS, PURCHASES).unwrap();
        let p = pipeline(ctx);

        let report = p.run(&RunOptions::default()).unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.units.len(), 10);
        assert!(report.units.iter().all(|u| u.status == UnitStatus::Succeeded));

        let products = report.unit(UnitId::Publish(ViewKind::ProductStats)).unwrap();
        assert_eq!(products.output.as_ref().unwrap().rows_out, 2);
        assert_eq!(report.publish_summary().collections, 4);

        let m = p.metrics().snapshot();
        assert_eq!(m.units_succeeded, 10);
        assert!(m.max_active_units <= 2);
    }

    #[test]
    fn resume_without_checkpoints_fails_structurally() {
        let p = pipeline(PipelineContext::in_memory());
        let report = p
            .run(&RunOptions {
                start_from: Stage::Aggregate,
                stop_after: Stage::Publish,
            })
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        let clean = report.unit(UnitId::CleanCustomers).unwrap();
        assert_eq!(clean.attempts, 1);
        assert!(matches!(clean.status, UnitStatus::Failed { .. }));
        assert!(matches!(
            report.unit(UnitId::Aggregate(ViewKind::MonthlyStats)).unwrap().status,
            UnitStatus::Skipped {
                reason: SkipReason::UpstreamFailed { .. }
            }
        ));
    }

    #[test]
    fn cancelled_before_start_runs_nothing() {
        let ctx = PipelineContext::in_memory();
        load_raw(&ctx, CUSTOMERS, PURCHASES).unwrap();
        let p = pipeline(ctx);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = p.run_with_cancel(&RunOptions::default(), &cancel).unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report.units.iter().all(|u| u.status
            == UnitStatus::Skipped {
                reason: SkipReason::Cancelled
            }));
        assert!(p.context().documents.list_collections().unwrap().is_empty());
    }

    #[test]
    fn invalid_options_are_rejected() {
        assert!(
            Pipeline::new(
                PipelineContext::in_memory(),
                ExecutionOptions {
                    workers: 0,
                    max_in_flight_units: 1,
                },
            )
            .is_err()
        );
        let p = pipeline(PipelineContext::in_memory());
        let err = p
            .run(&RunOptions {
                start_from: Stage::Publish,
                stop_after: Stage::Clean,
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }
}
