//! Prometheus metrics surface
//!
//! Every metric is registered once in a [`Metrics`] registry and labelled by
//! experiment name. Components receive small bound handles
//! ([`LoaderMetrics`], [`SourceMetrics`], [`TargetMetrics`]) holding the
//! label-resolved children they update.

mod server;

pub use server::serve_metrics;

use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::error::{Error, Result};

/// Metric namespace
pub const NAMESPACE: &str = "thunderdome";

/// Metric subsystem
pub const SUBSYSTEM: &str = "dealgood";

/// Histogram buckets for request timings, in seconds
pub const TIMING_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 240.0,
];

/// All metrics exported by dealgood
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    stream_requests: IntCounterVec,
    stream_wait: IntCounterVec,
    stream_lag: GaugeVec,
    stream_interval: GaugeVec,
    experiment_request_rate: IntGaugeVec,
    experiment_concurrency: IntGaugeVec,
    experiment_targets: IntGaugeVec,

    source_incoming: IntCounterVec,
    source_filtered: IntCounterVec,
    source_dropped: IntCounterVec,
    source_errors: IntCounterVec,
    source_connected: IntGaugeVec,

    requests: IntCounterVec,
    dropped: IntCounterVec,
    connect_errors: IntCounterVec,
    timeout_errors: IntCounterVec,
    responses: IntCounterVec,
    connect_time: HistogramVec,
    ttfb: HistogramVec,
    request_time: HistogramVec,
    worker_panics: IntCounterVec,
}

impl Metrics {
    /// Create metrics in a fresh registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics and register them in `registry`
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let exp = &["experiment"];
        let exp_source = &["experiment", "source"];
        let exp_target = &["experiment", "target"];

        let metrics = Self {
            stream_requests: counter_vec(
                &registry,
                "stream_requests_total",
                "Number of requests read from the request source.",
                exp,
            )?,
            stream_wait: counter_vec(
                &registry,
                "stream_wait_total",
                "Number of times the loader had to wait for a request from the source.",
                exp,
            )?,
            stream_lag: gauge_vec(
                &registry,
                "stream_lag_seconds",
                "Age of the most recent request at the time it was sent to targets.",
                exp,
            )?,
            stream_interval: gauge_vec(
                &registry,
                "stream_interval_seconds",
                "Interval between requests being sent to targets.",
                exp,
            )?,
            experiment_request_rate: int_gauge_vec(
                &registry,
                "experiment_request_rate",
                "Configured maximum request rate per second.",
                exp,
            )?,
            experiment_concurrency: int_gauge_vec(
                &registry,
                "experiment_concurrency",
                "Configured maximum concurrency per target.",
                exp,
            )?,
            experiment_targets: int_gauge_vec(
                &registry,
                "experiment_targets",
                "Number of targets in the experiment.",
                exp,
            )?,
            source_incoming: counter_vec(
                &registry,
                "source_requests_incoming_total",
                "Number of requests received by the source before filtering.",
                exp_source,
            )?,
            source_filtered: counter_vec(
                &registry,
                "source_requests_filtered_total",
                "Number of requests rejected by the request filter.",
                exp_source,
            )?,
            source_dropped: counter_vec(
                &registry,
                "source_requests_dropped_total",
                "Number of requests dropped because the stream buffer was full.",
                exp_source,
            )?,
            source_errors: counter_vec(
                &registry,
                "source_error_total",
                "Number of errors encountered while reading the source.",
                exp_source,
            )?,
            source_connected: int_gauge_vec(
                &registry,
                "source_connected",
                "1 while the source transport is connected.",
                exp_source,
            )?,
            requests: counter_vec(
                &registry,
                "requests_total",
                "Number of requests handled for a target.",
                exp_target,
            )?,
            dropped: counter_vec(
                &registry,
                "dropped_total",
                "Number of requests dropped because the target's workers were busy.",
                exp_target,
            )?,
            connect_errors: counter_vec(
                &registry,
                "connect_error_total",
                "Number of requests that failed to connect to a target.",
                exp_target,
            )?,
            timeout_errors: counter_vec(
                &registry,
                "timeout_error_total",
                "Number of requests that timed out.",
                exp_target,
            )?,
            responses: counter_vec(
                &registry,
                "responses_total",
                "Number of responses received from a target, by status code.",
                &["experiment", "target", "code"],
            )?,
            connect_time: histogram_vec(
                &registry,
                "connect_time_seconds",
                "Time taken to connect to a target.",
                exp_target,
            )?,
            ttfb: histogram_vec(
                &registry,
                "ttfb_seconds",
                "Time to first byte of a target's response.",
                exp_target,
            )?,
            request_time: histogram_vec(
                &registry,
                "request_time_seconds",
                "Total time taken to complete a request.",
                exp_target,
            )?,
            worker_panics: counter_vec(
                &registry,
                "worker_panics_total",
                "Number of workers that crashed.",
                exp_target,
            )?,
            registry,
        };

        Ok(metrics)
    }

    /// The registry holding every metric
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handles used by the loader
    pub fn loader(&self, experiment: &str) -> LoaderMetrics {
        LoaderMetrics {
            stream_requests: self.stream_requests.with_label_values(&[experiment]),
            stream_wait: self.stream_wait.with_label_values(&[experiment]),
            stream_lag: self.stream_lag.with_label_values(&[experiment]),
            stream_interval: self.stream_interval.with_label_values(&[experiment]),
            request_rate: self.experiment_request_rate.with_label_values(&[experiment]),
            concurrency: self.experiment_concurrency.with_label_values(&[experiment]),
            targets: self.experiment_targets.with_label_values(&[experiment]),
        }
    }

    /// Handles used by a request source
    pub fn source(&self, experiment: &str, source: &str) -> SourceMetrics {
        let labels = &[experiment, source];
        SourceMetrics {
            incoming: self.source_incoming.with_label_values(labels),
            filtered: self.source_filtered.with_label_values(labels),
            dropped: self.source_dropped.with_label_values(labels),
            errors: self.source_errors.with_label_values(labels),
            connected: self.source_connected.with_label_values(labels),
        }
    }

    /// Handles for one target, used by the collector and workers
    pub fn target(&self, experiment: &str, target: &str) -> TargetMetrics {
        let labels = &[experiment, target];
        TargetMetrics {
            experiment: experiment.to_string(),
            target: target.to_string(),
            requests: self.requests.with_label_values(labels),
            dropped: self.dropped.with_label_values(labels),
            connect_errors: self.connect_errors.with_label_values(labels),
            timeout_errors: self.timeout_errors.with_label_values(labels),
            responses: self.responses.clone(),
            connect_time: self.connect_time.with_label_values(labels),
            ttfb: self.ttfb.with_label_values(labels),
            request_time: self.request_time.with_label_values(labels),
            worker_panics: self.worker_panics.with_label_values(labels),
        }
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| Error::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("families", &self.registry.gather().len())
            .finish()
    }
}

/// Metrics updated by the loader's scheduling loop
#[derive(Debug, Clone)]
pub struct LoaderMetrics {
    /// Requests read from the source
    pub stream_requests: IntCounter,
    /// Ticks that had to wait for the source
    pub stream_wait: IntCounter,
    /// Age of the last request at fan-out
    pub stream_lag: Gauge,
    /// Seconds between fan-outs
    pub stream_interval: Gauge,
    /// Configured rate
    pub request_rate: IntGauge,
    /// Configured concurrency
    pub concurrency: IntGauge,
    /// Number of targets
    pub targets: IntGauge,
}

/// Metrics updated by a request source
#[derive(Debug, Clone)]
pub struct SourceMetrics {
    /// Requests seen before filtering
    pub incoming: IntCounter,
    /// Requests rejected by the filter
    pub filtered: IntCounter,
    /// Requests lost to a full stream buffer
    pub dropped: IntCounter,
    /// Read and decode errors
    pub errors: IntCounter,
    /// 1 while connected
    pub connected: IntGauge,
}

/// Per-target metrics updated by the collector
#[derive(Debug, Clone)]
pub struct TargetMetrics {
    experiment: String,
    target: String,
    /// All outcomes
    pub requests: IntCounter,
    /// Dropped outcomes
    pub dropped: IntCounter,
    /// Connect errors
    pub connect_errors: IntCounter,
    /// Timeouts
    pub timeout_errors: IntCounter,
    responses: IntCounterVec,
    /// Connect time histogram
    pub connect_time: Histogram,
    /// Time to first byte histogram
    pub ttfb: Histogram,
    /// Total request time histogram
    pub request_time: Histogram,
    /// Crashed workers
    pub worker_panics: IntCounter,
}

impl TargetMetrics {
    /// Count one response with the given status code
    pub fn observe_response(&self, status: u16) {
        self.responses
            .with_label_values(&[&self.experiment, &self.target, &status.to_string()])
            .inc();
    }

    /// Responses counted so far for a status code
    pub fn responses_for(&self, status: u16) -> u64 {
        self.responses
            .with_label_values(&[&self.experiment, &self.target, &status.to_string()])
            .get()
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM)
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    let vec = IntCounterVec::new(opts(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
    let vec = GaugeVec::new(opts(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn int_gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntGaugeVec> {
    let vec = IntGaugeVec::new(opts(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<HistogramVec> {
    let hopts = HistogramOpts::new(name, help)
        .namespace(NAMESPACE)
        .subsystem(SUBSYSTEM)
        .buckets(TIMING_BUCKETS.to_vec());
    let vec = HistogramVec::new(hopts, labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}
