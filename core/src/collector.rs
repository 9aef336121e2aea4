//! Aggregation of request timings into per-target snapshots
//!
//! The [`Collector`] is the only owner of the per-target accumulators. It
//! publishes an immutable map of [`MetricSample`]s every sample interval
//! through a [`SampleBoard`] that any number of observers can read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::experiment::Experiment;
use crate::metrics::{Metrics, TargetMetrics};
use crate::stats::{BackendStats, MetricSample};
use crate::timing::{Outcome, RequestTiming};

/// Default interval between published snapshots
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Published per-target samples, keyed by target name
pub type Snapshot = HashMap<String, MetricSample>;

/// Shared view of the most recent snapshot
#[derive(Clone, Default)]
pub struct SampleBoard {
    latest: Arc<Mutex<Arc<Snapshot>>>,
}

impl SampleBoard {
    /// The most recently published snapshot
    pub fn latest(&self) -> Arc<Snapshot> {
        match self.latest.lock() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn publish(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        match self.latest.lock() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

impl std::fmt::Debug for SampleBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBoard")
            .field("targets", &self.latest().len())
            .finish()
    }
}

/// Consumes timings and maintains per-target statistics
pub struct Collector {
    timings: mpsc::Receiver<RequestTiming>,
    sample_interval: Duration,
    board: SampleBoard,
    stats: HashMap<String, BackendStats>,
    target_metrics: HashMap<String, TargetMetrics>,
    metrics: Arc<Metrics>,
    experiment: String,
}

impl Collector {
    /// Create a collector with an entry for every target in the experiment
    pub fn new(
        experiment: &Experiment,
        timings: mpsc::Receiver<RequestTiming>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let stats = experiment
            .targets
            .iter()
            .map(|t| (t.name().to_string(), BackendStats::default()))
            .collect();
        let target_metrics = experiment
            .targets
            .iter()
            .map(|t| (t.name().to_string(), metrics.target(&experiment.name, t.name())))
            .collect();
        let collector = Self {
            timings,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            board: SampleBoard::default(),
            stats,
            target_metrics,
            metrics,
            experiment: experiment.name.clone(),
        };
        collector.board.publish(collector.zero_snapshot());
        collector
    }

    /// Change the interval between published snapshots
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Handle for reading published snapshots
    pub fn board(&self) -> SampleBoard {
        self.board.clone()
    }

    /// Run until the timings channel closes, then publish and return the final snapshot
    pub async fn run(mut self) -> Arc<Snapshot> {
        let mut ticker = tokio::time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            experiment = %self.experiment,
            interval_ms = self.sample_interval.as_millis() as u64,
            "Collector started"
        );

        loop {
            tokio::select! {
                timing = self.timings.recv() => match timing {
                    Some(timing) => self.record(timing),
                    None => break,
                },
                _ = ticker.tick() => self.publish(),
            }
        }

        self.publish();
        tracing::debug!(experiment = %self.experiment, "Collector finished");
        self.board.latest()
    }

    fn record(&mut self, timing: RequestTiming) {
        let stats = self.stats.entry(timing.target.clone()).or_default();
        stats.record(&timing.outcome);

        let (metrics, experiment) = (&self.metrics, &self.experiment);
        let tm = self
            .target_metrics
            .entry(timing.target.clone())
            .or_insert_with(|| metrics.target(experiment, &timing.target));
        tm.requests.inc();
        match timing.outcome {
            Outcome::Dropped => tm.dropped.inc(),
            Outcome::ConnectError => tm.connect_errors.inc(),
            Outcome::TimeoutError => tm.timeout_errors.inc(),
            Outcome::Completed {
                status,
                connect_time,
                ttfb,
                total_time,
            } => {
                tm.observe_response(status);
                tm.connect_time.observe(connect_time.as_secs_f64());
                tm.ttfb.observe(ttfb.as_secs_f64());
                tm.request_time.observe(total_time.as_secs_f64());
            }
        }
    }

    fn publish(&mut self) {
        let snapshot = self
            .stats
            .iter()
            .map(|(name, stats)| (name.clone(), stats.sample()))
            .collect();
        self.board.publish(snapshot);
    }

    fn zero_snapshot(&self) -> Snapshot {
        self.stats
            .keys()
            .map(|name| (name.clone(), MetricSample::default()))
            .collect()
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("experiment", &self.experiment)
            .field("sample_interval", &self.sample_interval)
            .field("targets", &self.stats.len())
            .finish()
    }
}
