//! Builder pattern for Loader construction

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::channel::ChannelConfig;
use crate::error::{Error, Result};
use crate::experiment::Experiment;
use crate::metrics::Metrics;
use crate::source::RequestSource;
use crate::timing::RequestTiming;
use crate::worker::DEFAULT_REQUEST_TIMEOUT;

use super::executor::Loader;

/// Builder for creating a Loader with proper configuration
///
/// # Example
///
/// ```ignore
/// let (loader, timings_rx) = LoaderBuilder::new()
///     .experiment(experiment)
///     .source(source)
///     .metrics(metrics)
///     .build()?;
///
/// let summary = loader.send(cancel).await?;
/// ```
pub struct LoaderBuilder {
    experiment: Option<Experiment>,
    source: Option<Box<dyn RequestSource>>,
    metrics: Option<Arc<Metrics>>,
    channel_config: ChannelConfig,
    request_timeout: Duration,
    print_failures: bool,
}

impl LoaderBuilder {
    /// Create a new loader builder with default configuration
    pub fn new() -> Self {
        Self {
            experiment: None,
            source: None,
            metrics: None,
            channel_config: ChannelConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            print_failures: false,
        }
    }

    /// Set the validated experiment
    pub fn experiment(mut self, experiment: Experiment) -> Self {
        self.experiment = Some(experiment);
        self
    }

    /// Set the request source
    pub fn source(mut self, source: Box<dyn RequestSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the metrics registry. A private registry is created when unset.
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the channel configuration
    pub fn channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    /// Set the per-request timeout used by workers
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Log every request that does not complete with a 2xx
    pub fn print_failures(mut self, enabled: bool) -> Self {
        self.print_failures = enabled;
        self
    }

    /// Build the loader and return it along with the timings receiver
    ///
    /// # Errors
    ///
    /// Returns an error if the experiment or source are not set, or if the
    /// metrics registry cannot be created.
    pub fn build(self) -> Result<(Loader, mpsc::Receiver<RequestTiming>)> {
        let experiment = self
            .experiment
            .ok_or_else(|| Error::missing_config("experiment"))?;

        let source = self.source.ok_or_else(|| Error::missing_config("source"))?;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(Metrics::new()?),
        };

        let (timings_tx, timings_rx) = mpsc::channel(self.channel_config.timings_buffer.max(1));

        let mut loader = Loader::new(experiment, source, timings_tx, metrics, self.request_timeout);
        loader.print_failures = self.print_failures;

        Ok((loader, timings_rx))
    }
}

impl Default for LoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}
