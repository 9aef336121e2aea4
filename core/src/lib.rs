//! dealgood-core: request replay engine for comparing HTTP gateways
//!
//! This crate provides the pieces used by the dealgood binary and sources:
//!
//! - Request and experiment models, request filters and target identity
//! - The loader that paces and fans requests out to per-target worker pools
//! - Instrumented HTTP workers and the collector of per-target statistics
//! - Histogram-backed timing distributions, Prometheus metrics and task supervision

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod collector;
pub mod error;
pub mod experiment;
pub mod filter;
pub mod lane;
pub mod loader;
pub mod metrics;
pub mod probe;
pub mod request;
pub mod run;
pub mod source;
pub mod stats;
pub mod target;
pub mod timing;
pub mod worker;

pub use channel::ChannelConfig;
pub use collector::{Collector, SampleBoard, Snapshot};
pub use error::{Error, Result, SourceError};
pub use experiment::{ConfigError, Experiment, ExperimentConfig, RunDuration, TargetConfig};
pub use filter::RequestFilter;
pub use loader::{LoadSummary, Loader, LoaderBuilder};
pub use metrics::{serve_metrics, Metrics};
pub use probe::{wait_ready, Probe};
pub use request::Request;
pub use run::RunGroup;
pub use source::{source_channel, Offer, RequestSource, SourceHandle, SourceSink};
pub use stats::{MetricSample, MetricValues, TimeMetric};
pub use target::{Scheme, Target};
pub use timing::{Outcome, RequestTiming};
pub use worker::{Worker, WorkerBuilder, WorkerStats};
