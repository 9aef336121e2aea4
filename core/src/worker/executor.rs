//! Worker execution loop

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::lane::LaneReceiver;
use crate::metrics::TargetMetrics;
use crate::target::Target;
use crate::timing::{Outcome, RequestTiming};

use super::client::TargetClient;
use super::stats::WorkerStats;

/// Worker issues requests for one target, one at a time: receive -> execute -> report
///
/// Workers of the same target share a lane receiver. A worker exits when its
/// lane is closed and drained. Requests still in flight when the run is
/// cancelled are abandoned and reported as timeouts.
pub struct Worker {
    /// Worker index within its target
    id: usize,

    /// Experiment name, copied into every timing
    experiment: String,

    /// HTTP client bound to the target
    client: TargetClient,

    /// Requests dispatched by the loader
    requests: LaneReceiver,

    /// Channel to the collector
    timings: mpsc::Sender<RequestTiming>,

    /// Per-target counters
    metrics: TargetMetrics,

    /// Log every request that does not end in a 2xx
    print_failures: bool,
}

impl Worker {
    /// Create a new worker
    pub fn new(
        id: usize,
        experiment: String,
        client: TargetClient,
        requests: LaneReceiver,
        timings: mpsc::Sender<RequestTiming>,
        metrics: TargetMetrics,
        print_failures: bool,
    ) -> Self {
        Self {
            id,
            experiment,
            client,
            requests,
            timings,
            metrics,
            print_failures,
        }
    }

    /// Run the worker loop until the lane closes
    pub async fn run(self, cancel: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::new();
        stats.start();

        tracing::debug!(
            worker_id = self.id,
            target_name = %self.target().name(),
            "Worker started"
        );

        while let Ok(dispatch) = self.requests.recv().await {
            let req = dispatch.request();

            let executed = tokio::select! {
                biased;
                _ = cancel.cancelled() => Ok(Outcome::TimeoutError),
                outcome = AssertUnwindSafe(self.client.execute(req)).catch_unwind() => outcome,
            };

            let (outcome, crashed) = match executed {
                Ok(outcome) => (outcome, false),
                Err(panic) => {
                    self.metrics.worker_panics.inc();
                    tracing::error!(
                        worker_id = self.id,
                        target_name = %self.target().name(),
                        panic = %panic_message(&*panic),
                        "Worker crashed"
                    );
                    (Outcome::ConnectError, true)
                }
            };

            stats.record(&outcome);
            if self.print_failures && !outcome.is_success() {
                tracing::warn!(
                    target_name = %self.target().name(),
                    uri = %req.uri,
                    outcome = ?outcome,
                    "Request failed"
                );
            }

            let timing = RequestTiming::new(&self.experiment, self.target().name(), outcome);
            if self.timings.send(timing).await.is_err() {
                tracing::debug!(worker_id = self.id, "Timings channel closed, worker stopping");
                break;
            }
            if crashed {
                // The lane must stop counting this worker as available.
                dispatch.retire();
                break;
            }
            drop(dispatch);
            if outcome == Outcome::ConnectError && !cancel.is_cancelled() {
                self.re_resolve(&cancel).await;
            }
        }

        stats.stop();
        tracing::debug!(
            worker_id = self.id,
            target_name = %self.target().name(),
            completed = stats.completed,
            errors = stats.errors(),
            elapsed_ms = ?stats.elapsed().map(|d| d.as_millis()),
            "Worker finished"
        );

        stats
    }

    /// The target this worker serves
    pub fn target(&self) -> &Arc<Target> {
        self.client.target()
    }

    /// Get the worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    async fn re_resolve(&self, cancel: &CancellationToken) {
        let target = self.target();
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = target.resolve() => {
                if let Err(e) = result {
                    tracing::debug!(
                        target_name = %target.name(),
                        error = %e,
                        "Unable to resolve target"
                    );
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("experiment", &self.experiment)
            .field("client", &self.client)
            .field("print_failures", &self.print_failures)
            .finish()
    }
}
