//! dealgood-sources: producers of replayable gateway requests
//!
//! Every source implements [`dealgood_core::RequestSource`]:
//!
//! - [`ReaderSource`] reads newline-delimited JSON from stdin
//! - [`RandomSource`] replays a fixed list forever, either the built-in
//!   [`corpus`] or requests parsed from an nginx access log
//! - [`LokiSource`] tails live traffic from Loki (feature `loki`)
//! - [`SqsSource`] consumes requests published through SNS/SQS (feature `sqs`)

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use dealgood_core::{ChannelConfig, Metrics, RequestFilter, RequestSource, SourceError};

#[cfg(any(feature = "loki", feature = "sqs"))]
pub mod backoff;
pub mod corpus;
#[cfg(feature = "loki")]
pub mod loki;
pub mod nginx;
pub mod random;
pub mod reader;
#[cfg(feature = "sqs")]
pub mod sqs;

#[cfg(feature = "loki")]
pub use loki::{LokiConfig, LokiSource};
pub use nginx::{from_nginx_log, parse_nginx_line};
pub use random::RandomSource;
pub use reader::{ReaderSource, StdinSource};
#[cfg(feature = "sqs")]
pub use sqs::{SqsConfig, SqsSource};

/// Which source to read requests from, as named on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Newline-delimited JSON on stdin
    Stdin,
    /// The built-in sample corpus in random order
    Random,
    /// Requests parsed from an nginx access log, in random order
    NginxLog(PathBuf),
    /// Live tail of a Loki query
    Loki,
    /// SNS notifications delivered to an SQS queue
    Sqs,
}

impl FromStr for SourceKind {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("nginx-log:") {
            if path.is_empty() {
                return Err(UnknownSource(s.to_string()));
            }
            return Ok(Self::NginxLog(PathBuf::from(path)));
        }
        match s {
            "stdin" | "-" => Ok(Self::Stdin),
            "random" => Ok(Self::Random),
            "loki" => Ok(Self::Loki),
            "sqs" => Ok(Self::Sqs),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => f.write_str("stdin"),
            Self::Random => f.write_str("random"),
            Self::NginxLog(path) => write!(f, "nginx-log:{}", path.display()),
            Self::Loki => f.write_str("loki"),
            Self::Sqs => f.write_str("sqs"),
        }
    }
}

/// Returned for an unrecognised `--source` value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source {0:?} (expected stdin, random, nginx-log:<path>, loki or sqs)")]
pub struct UnknownSource(pub String);

/// Everything needed to open a source
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Which source
    pub kind: SourceKind,
    /// Experiment name used to label the source metrics
    pub experiment: String,
    /// Filter applied before enqueueing
    pub filter: RequestFilter,
    /// Request rate, used to size streaming buffers
    pub rate: u32,
    /// Channel sizes
    pub channels: ChannelConfig,
    /// Loki connection, required for [`SourceKind::Loki`]
    #[cfg(feature = "loki")]
    pub loki: Option<LokiConfig>,
    /// Queue, required for [`SourceKind::Sqs`]
    #[cfg(feature = "sqs")]
    pub sqs: Option<SqsConfig>,
}

impl SourceOptions {
    /// Options for `kind` with default channels and no remote settings
    pub fn new(kind: SourceKind, experiment: impl Into<String>, filter: RequestFilter, rate: u32) -> Self {
        Self {
            kind,
            experiment: experiment.into(),
            filter,
            rate,
            channels: ChannelConfig::default(),
            #[cfg(feature = "loki")]
            loki: None,
            #[cfg(feature = "sqs")]
            sqs: None,
        }
    }
}

/// Build the source described by `opts`. The source is not started.
pub async fn open_source(opts: SourceOptions, metrics: &Metrics) -> Result<Box<dyn RequestSource>, SourceError> {
    let name = opts.kind.source_name();
    let source_metrics = metrics.source(&opts.experiment, name);
    let on_demand = opts.channels.source_buffer.max(1);
    let streaming = opts.channels.streaming_buffer(opts.rate);

    let source: Box<dyn RequestSource> = match opts.kind {
        SourceKind::Stdin => Box::new(StdinSource::stdin(on_demand, opts.filter, source_metrics)),
        SourceKind::Random => Box::new(RandomSource::new(
            corpus::sample_requests(),
            on_demand,
            opts.filter,
            source_metrics,
        )),
        SourceKind::NginxLog(path) => Box::new(from_nginx_log(&path, on_demand, opts.filter, source_metrics).await?),
        #[cfg(feature = "loki")]
        SourceKind::Loki => {
            let config = opts
                .loki
                .ok_or_else(|| SourceError::start(name, "loki uri and query are required"))?;
            Box::new(LokiSource::new(config, streaming, opts.filter, source_metrics))
        }
        #[cfg(feature = "sqs")]
        SourceKind::Sqs => {
            let config = opts
                .sqs
                .ok_or_else(|| SourceError::start(name, "queue name is required"))?;
            Box::new(SqsSource::new(config, streaming, opts.filter, source_metrics))
        }
        #[allow(unreachable_patterns)]
        other => {
            let _ = streaming;
            return Err(SourceError::start(name, format!("{other} support was not compiled in")));
        }
    };
    tracing::debug!(source = %source.name(), "Opened request source");
    Ok(source)
}

impl SourceKind {
    /// The name the opened source reports
    pub fn source_name(&self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Random => "random",
            Self::NginxLog(_) => nginx::NGINX_SOURCE,
            Self::Loki => "loki",
            Self::Sqs => "sqs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_kind() {
        assert_eq!("stdin".parse::<SourceKind>().unwrap(), SourceKind::Stdin);
        assert_eq!("-".parse::<SourceKind>().unwrap(), SourceKind::Stdin);
        assert_eq!("random".parse::<SourceKind>().unwrap(), SourceKind::Random);
        assert_eq!(
            "nginx-log:/var/log/nginx/access.log".parse::<SourceKind>().unwrap(),
            SourceKind::NginxLog(PathBuf::from("/var/log/nginx/access.log"))
        );
        assert_eq!("loki".parse::<SourceKind>().unwrap(), SourceKind::Loki);
        assert!("nginx-log:".parse::<SourceKind>().is_err());
        assert!("kafka".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let kind = SourceKind::NginxLog(PathBuf::from("access.log"));
        assert_eq!(kind.to_string().parse::<SourceKind>().unwrap(), kind);
        assert_eq!(kind.source_name(), "nginx-log");
    }

    #[tokio::test]
    async fn test_open_random_source() {
        let metrics = Metrics::new().unwrap();
        let opts = SourceOptions::new(SourceKind::Random, "exp", RequestFilter::PathOnly, 10);
        let mut source = open_source(opts, &metrics).await.unwrap();
        assert_eq!(source.name(), "random");

        source.start().await.unwrap();
        let mut stream = source.stream().unwrap();
        assert!(stream.recv().await.is_some());
        source.stop();
    }

    #[tokio::test]
    async fn test_source_buffer_sizes_on_demand_stream() {
        let metrics = Metrics::new().unwrap();
        let mut opts = SourceOptions::new(SourceKind::Random, "exp", RequestFilter::None, 10);
        opts.channels = ChannelConfig::default().with_source_buffer(8);
        let mut source = open_source(opts, &metrics).await.unwrap();

        source.start().await.unwrap();
        let stream = source.stream().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(stream.len(), 8);
        source.stop();
    }

    #[cfg(feature = "loki")]
    #[tokio::test]
    async fn test_loki_requires_config() {
        let metrics = Metrics::new().unwrap();
        let opts = SourceOptions::new(SourceKind::Loki, "exp", RequestFilter::None, 10);
        let err = open_source(opts, &metrics).await.err().unwrap();
        assert!(err.to_string().contains("loki"));
    }

    #[tokio::test]
    async fn test_missing_nginx_log() {
        let metrics = Metrics::new().unwrap();
        let opts = SourceOptions::new(
            SourceKind::NginxLog(PathBuf::from("/nonexistent/access.log")),
            "exp",
            RequestFilter::None,
            10,
        );
        assert!(open_source(opts, &metrics).await.is_err());
    }
}
