//! CLI argument parsing and run configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dealgood_core::{Experiment, ExperimentConfig};
use dealgood_sources::{LokiConfig, SourceKind, SourceOptions, SqsConfig};

mod run;

pub use run::run;

#[derive(Parser, Debug)]
#[command(name = "dealgood")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Path to the experiment file
    #[arg(short, long, env = "DEALGOOD_EXPERIMENT")]
    pub experiment: PathBuf,

    /// Request source: stdin, random, nginx-log:<path>, loki or sqs
    #[arg(short, long, default_value = "stdin")]
    pub source: SourceKind,

    /// Requests per second, overriding the experiment file
    #[arg(long)]
    pub rate: Option<i64>,

    /// Workers per target, overriding the experiment file
    #[arg(long)]
    pub concurrency: Option<i64>,

    /// Run time in seconds (-1 runs until interrupted), overriding the experiment file
    #[arg(long, allow_negative_numbers = true)]
    pub duration: Option<i64>,

    /// Request filter: none, pathonly or validpathonly
    #[arg(long)]
    pub filter: Option<String>,

    /// Print the experiment description before starting
    #[arg(long)]
    pub print_header: bool,

    /// Periodically print per-target timings
    #[arg(long)]
    pub print_timings: bool,

    /// Log every request that fails or gets a non-2xx response
    #[arg(long)]
    pub print_failures: bool,

    /// Print timings every second instead of every five minutes
    #[arg(long)]
    pub interactive: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "DEALGOOD_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Wait up to this many seconds for every target to answer before starting
    #[arg(long)]
    pub probe_timeout: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout: u64,

    /// Loki server URI
    #[arg(long, env = "DEALGOOD_LOKI_URI")]
    pub loki_uri: Option<String>,

    /// Loki basic auth user
    #[arg(long, env = "DEALGOOD_LOKI_USERNAME")]
    pub loki_username: Option<String>,

    /// Loki basic auth password
    #[arg(long, env = "DEALGOOD_LOKI_PASSWORD", hide_env_values = true)]
    pub loki_password: Option<String>,

    /// LogQL query selecting gateway access logs
    #[arg(long, env = "DEALGOOD_LOKI_QUERY")]
    pub loki_query: Option<String>,

    /// Loki tenant (X-Scope-OrgID)
    #[arg(long, env = "DEALGOOD_LOKI_ORG_ID")]
    pub loki_org_id: Option<String>,

    /// Loki query tags (X-Query-Tags)
    #[arg(long, env = "DEALGOOD_LOKI_QUERY_TAGS")]
    pub loki_query_tags: Option<String>,

    /// SQS queue name
    #[arg(long, env = "DEALGOOD_SQS_QUEUE")]
    pub sqs_queue: Option<String>,

    /// AWS region of the queue
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,
}

impl Cli {
    /// Load the experiment file and apply command line overrides
    pub fn experiment(&self) -> Result<Experiment> {
        let mut config = ExperimentConfig::from_file(&self.experiment)
            .with_context(|| format!("load experiment {}", self.experiment.display()))?;
        if let Some(rate) = self.rate {
            config = config.with_rate(rate);
        }
        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(duration) = self.duration {
            config = config.with_duration(duration);
        }
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        config.validate().context("invalid experiment")
    }

    /// Source settings for a validated experiment
    pub fn source_options(&self, exp: &Experiment) -> SourceOptions {
        let mut opts = SourceOptions::new(
            self.source.clone(),
            exp.name.clone(),
            exp.filter,
            exp.rate.get(),
        );
        opts.loki = self.loki_config();
        opts.sqs = self.sqs_queue.as_ref().map(|queue| SqsConfig {
            queue: queue.clone(),
            region: self.aws_region.clone(),
        });
        opts
    }

    fn loki_config(&self) -> Option<LokiConfig> {
        let (uri, query) = (self.loki_uri.as_ref()?, self.loki_query.as_ref()?);
        Some(LokiConfig {
            uri: uri.clone(),
            username: self.loki_username.clone(),
            password: self.loki_password.clone(),
            query: query.clone(),
            org_id: self.loki_org_id.clone(),
            query_tags: self.loki_query_tags.clone(),
        })
    }

    /// How often the timings table is printed
    pub fn timings_interval(&self) -> Duration {
        if self.interactive {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(300)
        }
    }

    /// Filter for log output
    pub fn log_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
