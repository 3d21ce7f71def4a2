use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::report::{RunStatus, SkipReason, UnitReport, UnitStatus};
use super::unit::UnitId;

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted { units: usize },
    ThrottleWaited { unit: UnitId, duration: Duration },
    UnitStarted { unit: UnitId, attempt: u32 },
    UnitRetrying {
        unit: UnitId,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    UnitFinished { report: UnitReport },
    UnitSkipped { unit: UnitId, reason: SkipReason },
    RunFinished {
        status: RunStatus,
        elapsed: Duration,
        metrics: PipelineMetricsSnapshot,
    },
}

/// Observer hook for orchestrator events.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted { units } => tracing::info!(units, "pipeline run started"),
            PipelineEvent::ThrottleWaited { unit, duration } => {
                tracing::debug!(unit = %unit, waited = ?duration, "unit waited for a slot")
            }
            PipelineEvent::UnitStarted { unit, attempt } => {
                tracing::info!(unit = %unit, attempt, "unit started")
            }
            PipelineEvent::UnitRetrying {
                unit,
                attempt,
                delay,
                error,
            } => tracing::warn!(unit = %unit, attempt, ?delay, error = %error, "unit failed, retrying"),
            PipelineEvent::UnitFinished { report } => match &report.status {
                UnitStatus::Failed { class, error } => tracing::error!(
                    unit = %report.unit,
                    attempts = report.attempts,
                    ?class,
                    error = %error,
                    "unit failed"
                ),
                status => tracing::info!(
                    unit = %report.unit,
                    ?status,
                    elapsed = ?report.elapsed,
                    rows_out = ?report.output.as_ref().map(|o| o.rows_out),
                    "unit finished"
                ),
            },
            PipelineEvent::UnitSkipped { unit, reason } => {
                tracing::warn!(unit = %unit, ?reason, "unit skipped")
            }
            PipelineEvent::RunFinished {
                status,
                elapsed,
                metrics,
            } => tracing::info!(?status, ?elapsed, %metrics, "pipeline run finished"),
        }
    }
}

/// Fans events out to several observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl PipelineObserver for CompositeObserver {
    fn on_event(&self, event: &PipelineEvent) {
        for o in &self.observers {
            o.on_event(event);
        }
    }
}

/// Real-time counters for the current run.
///
/// The orchestrator updates these during execution; callers can snapshot them at any time.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    units_started: AtomicU64,
    units_succeeded: AtomicU64,
    units_failed: AtomicU64,
    units_skipped: AtomicU64,
    retries: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_units: AtomicUsize,
    max_active_units: AtomicUsize,
}

fn nanos(d: Duration) -> u64 {
    d.as_nanos().min(u128::from(u64::MAX)) as u64
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin_run(&self) {
        self.run_id.fetch_add(1, Ordering::SeqCst);
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.units_started.store(0, Ordering::SeqCst);
        self.units_succeeded.store(0, Ordering::SeqCst);
        self.units_failed.store(0, Ordering::SeqCst);
        self.units_skipped.store(0, Ordering::SeqCst);
        self.retries.store(0, Ordering::SeqCst);
        self.throttle_wait_ns.store(0, Ordering::SeqCst);
        self.active_units.store(0, Ordering::SeqCst);
        self.max_active_units.store(0, Ordering::SeqCst);
    }

    pub(crate) fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns.store(nanos(elapsed), Ordering::SeqCst);
    }

    pub(crate) fn on_unit_start(&self) {
        self.units_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_units.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_units.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn on_unit_end(&self, succeeded: bool) {
        if succeeded {
            self.units_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.units_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.active_units.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn on_unit_skipped(&self) {
        self.units_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_throttle_wait(&self, d: Duration) {
        self.throttle_wait_ns.fetch_add(nanos(d), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        PipelineMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            units_started: self.units_started.load(Ordering::SeqCst),
            units_succeeded: self.units_succeeded.load(Ordering::SeqCst),
            units_failed: self.units_failed.load(Ordering::SeqCst),
            units_skipped: self.units_skipped.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
            max_active_units: self.max_active_units.load(Ordering::SeqCst),
        }
    }
}

/// Immutable snapshot of [`PipelineMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub units_started: u64,
    pub units_succeeded: u64,
    pub units_failed: u64,
    pub units_skipped: u64,
    pub retries: u64,
    pub throttle_wait: Duration,
    pub max_active_units: usize,
}

impl fmt::Display for PipelineMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, units={}/{} ok, failed={}, skipped={}, retries={}, max_active_units={}, throttle_wait={:?}, elapsed={:?}",
            self.run_id,
            self.units_succeeded,
            self.units_started,
            self.units_failed,
            self.units_skipped,
            self.retries,
            self.max_active_units,
            self.throttle_wait,
            self.elapsed
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{CompositeObserver, PipelineEvent, PipelineMetrics, PipelineObserver};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl PipelineObserver for Counter {
        fn on_event(&self, _event: &PipelineEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn composite_forwards_every_event_to_each_observer() {
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let observers: Vec<Arc<dyn PipelineObserver>> = vec![a.clone(), b.clone()];
        let composite = CompositeObserver::new(observers);

        composite.on_event(&PipelineEvent::RunStarted { units: 10 });
        composite.on_event(&PipelineEvent::RunStarted { units: 2 });

        assert_eq!(a.0.load(Ordering::SeqCst), 2);
        assert_eq!(b.0.load(Ordering::SeqCst), 2);
        assert!(format!("{composite:?}").contains("observers_len: 2"));
    }

    #[test]
    fn metrics_track_peak_concurrency_and_reset_per_run() {
        let m = PipelineMetrics::new();
        m.begin_run();
        m.on_unit_start();
        m.on_unit_start();
        m.on_unit_end(true);
        m.on_unit_start();
        m.on_unit_end(false);
        m.on_unit_end(true);
        m.on_retry();
        m.on_unit_skipped();
        m.end_run(Duration::from_millis(4));

        let s = m.snapshot();
        assert_eq!(s.run_id, 1);
        assert_eq!((s.units_started, s.units_succeeded, s.units_failed), (3, 2, 1));
        assert_eq!((s.retries, s.units_skipped), (1, 1));
        assert_eq!(s.max_active_units, 2);
        assert_eq!(s.elapsed, Some(Duration::from_millis(4)));
        assert!(s.to_string().contains("max_active_units=2"));

        m.begin_run();
        let s = m.snapshot();
        assert_eq!(s.run_id, 2);
        assert_eq!(s.units_started, 0);
        assert_eq!(s.elapsed, None);
    }
}
