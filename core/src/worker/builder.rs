//! Builder pattern for Worker construction

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::lane::LaneReceiver;
use crate::metrics::TargetMetrics;
use crate::target::Target;
use crate::timing::RequestTiming;

use super::client::{TargetClient, DEFAULT_REQUEST_TIMEOUT};
use super::executor::Worker;

/// Builder for creating Worker instances
///
/// # Example
/// ```ignore
/// let worker = WorkerBuilder::new(0)
///     .experiment("exp")
///     .target(target)
///     .requests(lane_rx)
///     .timings(timings_tx)
///     .metrics(metrics.target("exp", "alpha"))
///     .build()?;
/// ```
pub struct WorkerBuilder {
    id: usize,
    experiment: Option<String>,
    target: Option<Arc<Target>>,
    requests: Option<LaneReceiver>,
    timings: Option<mpsc::Sender<RequestTiming>>,
    metrics: Option<TargetMetrics>,
    timeout: Duration,
    print_failures: bool,
}

impl WorkerBuilder {
    /// Create a new builder with the given worker ID
    pub fn new(id: usize) -> Self {
        Self {
            id,
            experiment: None,
            target: None,
            requests: None,
            timings: None,
            metrics: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            print_failures: false,
        }
    }

    /// Set the experiment name
    pub fn experiment(mut self, name: impl Into<String>) -> Self {
        self.experiment = Some(name.into());
        self
    }

    /// Set the target
    pub fn target(mut self, target: Arc<Target>) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the lane the worker reads from
    pub fn requests(mut self, rx: LaneReceiver) -> Self {
        self.requests = Some(rx);
        self
    }

    /// Set the timings channel sender
    pub fn timings(mut self, tx: mpsc::Sender<RequestTiming>) -> Self {
        self.timings = Some(tx);
        self
    }

    /// Set the per-target metrics
    pub fn metrics(mut self, metrics: TargetMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log requests that do not complete with a 2xx
    pub fn print_failures(mut self, enabled: bool) -> Self {
        self.print_failures = enabled;
        self
    }

    /// Build the Worker
    ///
    /// # Errors
    /// Returns an error if any required field is missing or the TLS client
    /// cannot be configured.
    pub fn build(self) -> Result<Worker> {
        let experiment = self
            .experiment
            .ok_or(Error::missing_config("experiment"))?;
        let target = self.target.ok_or(Error::missing_config("target"))?;
        let requests = self.requests.ok_or(Error::missing_config("requests"))?;
        let timings = self.timings.ok_or(Error::missing_config("timings"))?;
        let metrics = self.metrics.ok_or(Error::missing_config("metrics"))?;

        let client = TargetClient::new(target, self.timeout)?;

        Ok(Worker::new(
            self.id,
            experiment,
            client,
            requests,
            timings,
            metrics,
            self.print_failures,
        ))
    }
}
