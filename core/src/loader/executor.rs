//! Loader execution logic

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, SourceError};
use crate::experiment::{Experiment, RunDuration};
use crate::lane::{lane, LaneSender};
use crate::metrics::{LoaderMetrics, Metrics};
use crate::request::Request;
use crate::source::RequestSource;
use crate::target::Target;
use crate::timing::RequestTiming;
use crate::worker::{WorkerBuilder, WorkerStats};

use super::pacer::Pacer;

/// Totals for one loader run
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    /// Requests read from the source and fanned out
    pub requests: u64,

    /// Ticks that had to wait for the source
    pub stream_waits: u64,

    /// Dropped timings synthesized by the loader, across all targets
    pub dropped: u64,

    /// Merged worker statistics
    pub workers: WorkerStats,

    /// Time from the first tick to the last worker exit
    pub elapsed: Duration,
}

/// A target together with the loader side of its lane
struct Fanout {
    target: Arc<Target>,
    lane: LaneSender,
}

/// Why the scheduling loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    StreamClosed,
}

/// Loader reads requests from a source and replays each one to every target
///
/// Requests are paced at the experiment rate. Fan-out never waits: when all of
/// a target's workers are busy the loader records a dropped timing for that
/// target instead.
pub struct Loader {
    /// Validated experiment
    pub(crate) experiment: Experiment,

    /// Request source, started by [`Loader::send`]
    pub(crate) source: Box<dyn RequestSource>,

    /// Timings sender (cloned for each worker)
    pub(crate) timings: mpsc::Sender<RequestTiming>,

    /// Shared metrics registry
    pub(crate) metrics: Arc<Metrics>,

    /// Per-request timeout applied by workers
    pub(crate) request_timeout: Duration,

    /// Log every failed request
    pub(crate) print_failures: bool,
}

impl Loader {
    /// Create a new loader
    ///
    /// Use `LoaderBuilder` for a more ergonomic construction.
    pub fn new(
        experiment: Experiment,
        source: Box<dyn RequestSource>,
        timings: mpsc::Sender<RequestTiming>,
        metrics: Arc<Metrics>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            experiment,
            source,
            timings,
            metrics,
            request_timeout,
            print_failures: false,
        }
    }

    /// Get the experiment
    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    /// Run the experiment until the deadline passes, `cancel` fires or the
    /// source closes its stream.
    ///
    /// Workers are always shut down before this returns. A terminal source
    /// error is returned after shutdown; reaching the deadline or being
    /// cancelled is a clean exit.
    pub async fn send(mut self, cancel: CancellationToken) -> Result<LoadSummary> {
        let exp_name = self.experiment.name.clone();
        let metrics = self.metrics.loader(&exp_name);
        metrics.request_rate.set(i64::from(self.experiment.rate.get()));
        metrics
            .concurrency
            .set(i64::try_from(self.experiment.concurrency).unwrap_or(i64::MAX));
        metrics
            .targets
            .set(i64::try_from(self.experiment.targets.len()).unwrap_or(i64::MAX));

        let run = cancel.child_token();
        if let RunDuration::Bounded(limit) = self.experiment.duration {
            let deadline = run.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = deadline.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        tracing::debug!(duration_secs = limit.as_secs(), "Experiment deadline reached");
                        deadline.cancel();
                    }
                }
            });
        }

        tracing::info!(
            experiment = %exp_name,
            source = %self.source.name(),
            rate = self.experiment.rate.get(),
            concurrency = self.experiment.concurrency,
            targets = self.experiment.targets.len(),
            duration = ?self.experiment.duration.limit(),
            "Starting experiment"
        );

        let (fanout, mut workers) = match self.spawn_workers(&run) {
            Ok(spawned) => spawned,
            Err(e) => {
                run.cancel();
                return Err(e);
            }
        };

        let start = Instant::now();
        let mut summary = LoadSummary::default();
        let outcome = match self.start_source().await {
            Ok(mut stream) => {
                let reason = self
                    .schedule(&run, &mut stream, &fanout, &metrics, &mut summary)
                    .await;
                tracing::debug!(experiment = %exp_name, reason = ?reason, "Scheduling loop stopped");
                Ok(())
            }
            Err(e) => Err(e),
        };

        for f in &fanout {
            f.lane.close();
        }
        self.source.stop();

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(stats) => summary.workers.merge(&stats),
                Err(e) => tracing::error!(error = %e, "Worker task failed"),
            }
        }
        summary.elapsed = start.elapsed();

        // Stop the deadline timer.
        run.cancel();

        tracing::info!(
            experiment = %exp_name,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            requests = summary.requests,
            dropped = summary.dropped,
            completed = summary.workers.completed,
            connect_errors = summary.workers.connect_errors,
            timeouts = summary.workers.timeouts,
            "Experiment completed"
        );

        outcome?;
        if let Some(err) = self.source.error() {
            return Err(Error::Source(err));
        }
        Ok(summary)
    }

    fn spawn_workers(
        &self,
        run: &CancellationToken,
    ) -> Result<(Vec<Fanout>, JoinSet<WorkerStats>)> {
        let mut fanout = Vec::with_capacity(self.experiment.targets.len());
        let mut workers = JoinSet::new();

        for target in &self.experiment.targets {
            let (lane_tx, lane_rx) = lane(self.experiment.concurrency);
            let target_metrics = self.metrics.target(&self.experiment.name, target.name());
            for worker_id in 0..self.experiment.concurrency {
                let worker = WorkerBuilder::new(worker_id)
                    .experiment(self.experiment.name.clone())
                    .target(Arc::clone(target))
                    .requests(lane_rx.clone())
                    .timings(self.timings.clone())
                    .metrics(target_metrics.clone())
                    .timeout(self.request_timeout)
                    .print_failures(self.print_failures)
                    .build()?;
                workers.spawn(worker.run(run.clone()));
            }
            fanout.push(Fanout {
                target: Arc::clone(target),
                lane: lane_tx,
            });
        }

        tracing::debug!(workers = workers.len(), "Workers started");
        Ok((fanout, workers))
    }

    async fn start_source(&mut self) -> Result<mpsc::Receiver<Request>> {
        self.source.start().await?;
        self.source
            .stream()
            .ok_or_else(|| Error::Source(SourceError::StreamTaken(self.source.name().to_string())))
    }

    async fn schedule(
        &self,
        run: &CancellationToken,
        stream: &mut mpsc::Receiver<Request>,
        fanout: &[Fanout],
        metrics: &LoaderMetrics,
        summary: &mut LoadSummary,
    ) -> StopReason {
        let pacer = Pacer::new(self.experiment.rate);
        let mut last_fanout: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = run.cancelled() => return StopReason::Cancelled,
                _ = pacer.tick() => {}
            }

            let req = match stream.try_recv() {
                Ok(req) => req,
                Err(TryRecvError::Disconnected) => return StopReason::StreamClosed,
                Err(TryRecvError::Empty) => {
                    // Source-starved: the tick arrived before a request did.
                    metrics.stream_wait.inc();
                    summary.stream_waits += 1;
                    tokio::select! {
                        biased;
                        _ = run.cancelled() => return StopReason::Cancelled,
                        next = stream.recv() => match next {
                            Some(req) => req,
                            None => return StopReason::StreamClosed,
                        },
                    }
                }
            };

            metrics.stream_requests.inc();
            summary.requests += 1;
            if let Some(lag) = req.lag_at(Utc::now()) {
                metrics.stream_lag.set(lag);
            }
            let now = Instant::now();
            if let Some(prev) = last_fanout.replace(now) {
                metrics.stream_interval.set(now.duration_since(prev).as_secs_f64());
            }

            for f in fanout {
                if f.lane.try_dispatch(req.clone()).is_ok() {
                    continue;
                }
                summary.dropped += 1;
                let timing = RequestTiming::dropped(&self.experiment.name, f.target.name());
                if self.timings.send(timing).await.is_err() {
                    tracing::debug!(target_name = %f.target.name(), "Timings channel closed, dropped timing lost");
                }
            }
        }
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("experiment", &self.experiment.name)
            .field("source", &self.source.name())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
