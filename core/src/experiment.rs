//! Experiment configuration types
//!
//! [`ExperimentConfig`] mirrors the JSON experiment document. Calling
//! [`ExperimentConfig::validate`] produces an [`Experiment`], the checked form
//! the Loader runs.

use std::collections::HashSet;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::filter::RequestFilter;
use crate::target::{default_target_name, Target};

/// Experiment document as read from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment name, used to label metrics
    #[serde(default)]
    pub name: String,

    /// Maximum requests per second issued to every target
    #[serde(default)]
    pub rate: i64,

    /// Number of concurrent requests per target
    #[serde(default)]
    pub concurrency: i64,

    /// Duration in seconds, or -1 to run until cancelled
    #[serde(default)]
    pub duration: i64,

    /// Request filter tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Targets to compare
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// One target entry in the experiment document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Short name; defaults to the base URL's host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// `scheme://host[:port]`, no path
    #[serde(default)]
    pub base_url: String,

    /// Host header override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl TargetConfig {
    /// Target with an explicit name
    pub fn named(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            base_url: base_url.into(),
            host: None,
        }
    }

    /// Set the Host header override
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// How long an experiment runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDuration {
    /// Stop after the given duration
    Bounded(Duration),
    /// Run until cancelled
    Unbounded,
}

impl RunDuration {
    /// Duration if bounded
    pub fn limit(&self) -> Option<Duration> {
        match self {
            Self::Bounded(d) => Some(*d),
            Self::Unbounded => None,
        }
    }
}

/// A validated experiment
#[derive(Debug, Clone)]
pub struct Experiment {
    /// Experiment name
    pub name: String,
    /// Global request rate per second
    pub rate: NonZeroU32,
    /// Workers per target
    pub concurrency: usize,
    /// Run length
    pub duration: RunDuration,
    /// Filter applied by sources
    pub filter: RequestFilter,
    /// Targets in document order
    pub targets: Vec<Arc<Target>>,
}

impl ExperimentConfig {
    /// Read an experiment document from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&data)
    }

    /// Parse an experiment document
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(data).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override the rate
    pub fn with_rate(mut self, rate: i64) -> Self {
        self.rate = rate;
        self
    }

    /// Override the concurrency
    pub fn with_concurrency(mut self, concurrency: i64) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Override the duration
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    /// Override the filter tag
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<Experiment, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        if !is_valid_name(&self.name) {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }

        let rate = u32::try_from(self.rate)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(ConfigError::InvalidRate(self.rate))?;

        let concurrency = usize::try_from(self.concurrency)
            .ok()
            .filter(|c| *c > 0)
            .ok_or(ConfigError::InvalidConcurrency(self.concurrency))?;

        let duration = match self.duration {
            -1 => RunDuration::Unbounded,
            d if d > 0 => RunDuration::Bounded(Duration::from_secs(d as u64)),
            d => return Err(ConfigError::InvalidDuration(d)),
        };

        let filter = match self.filter.as_deref() {
            Some(tag) => tag
                .parse::<RequestFilter>()
                .map_err(|e| ConfigError::InvalidFilter(e.0))?,
            None => RequestFilter::None,
        };

        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.targets.len());
        for (idx, tc) in self.targets.iter().enumerate() {
            if tc.base_url.is_empty() {
                return Err(ConfigError::MissingBaseUrl(idx + 1));
            }
            let name = match tc.name.as_deref() {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => default_target_name(&tc.base_url).ok_or_else(|| {
                    ConfigError::InvalidTarget {
                        target: format!("#{}", idx + 1),
                        reason: format!("invalid base url {:?}", tc.base_url),
                    }
                })?,
            };
            if !is_valid_name(&name) {
                return Err(ConfigError::InvalidTargetName(name));
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateTarget(name));
            }
            targets.push(Arc::new(Target::new(&name, &tc.base_url, tc.host.as_deref())?));
        }

        Ok(Experiment {
            name: self.name.clone(),
            rate,
            concurrency,
            duration,
            filter,
            targets,
        })
    }
}

impl Experiment {
    /// Number of workers across all targets
    pub fn total_workers(&self) -> usize {
        self.targets.len() * self.concurrency
    }

    /// Interval between two paced requests
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate.get()
    }
}

/// Names start with a lowercase letter followed by `[a-z0-9-]`
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The experiment file could not be read
    #[error("read {path}: {message}")]
    Read {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// The experiment document is not valid JSON
    #[error("parse experiment: {0}")]
    Parse(String),

    /// No experiment name given
    #[error("experiment name must be specified")]
    MissingName,

    /// Experiment name has the wrong shape
    #[error("invalid experiment name {0:?}: must start with a lowercase letter and contain only a-z, 0-9 and '-'")]
    InvalidName(String),

    /// Rate out of range
    #[error("rate must be greater than zero, got {0}")]
    InvalidRate(i64),

    /// Concurrency out of range
    #[error("concurrency must be greater than zero, got {0}")]
    InvalidConcurrency(i64),

    /// Duration out of range
    #[error("duration must be -1 or greater than zero, got {0}")]
    InvalidDuration(i64),

    /// Unknown filter tag
    #[error("unknown filter {0:?}")]
    InvalidFilter(String),

    /// Empty target list
    #[error("at least one target must be specified")]
    NoTargets,

    /// A target without a base URL
    #[error("target {0} must have a base url")]
    MissingBaseUrl(usize),

    /// A target name has the wrong shape
    #[error("invalid target name {0:?}: must start with a lowercase letter and contain only a-z, 0-9 and '-'")]
    InvalidTargetName(String),

    /// Two targets share a name
    #[error("duplicate target name found: {0}")]
    DuplicateTarget(String),

    /// A target definition is malformed
    #[error("target {target}: {reason}")]
    InvalidTarget {
        /// Target name or position
        target: String,
        /// What is wrong
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ExperimentConfig {
        ExperimentConfig {
            name: "exp1".into(),
            rate: 10,
            concurrency: 2,
            duration: 60,
            filter: None,
            targets: vec![
                TargetConfig::named("alpha", "http://alpha.example:8080"),
                TargetConfig::named("beta", "https://beta.example").with_host("ipfs.io"),
            ],
        }
    }

    #[test]
    fn test_validate_ok() {
        let exp = base().validate().unwrap();
        assert_eq!(exp.name, "exp1");
        assert_eq!(exp.rate.get(), 10);
        assert_eq!(exp.concurrency, 2);
        assert_eq!(exp.duration, RunDuration::Bounded(Duration::from_secs(60)));
        assert_eq!(exp.filter, RequestFilter::None);
        assert_eq!(exp.targets.len(), 2);
        assert_eq!(exp.targets[1].host_name(), "ipfs.io");
        assert_eq!(exp.total_workers(), 4);
        assert_eq!(exp.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_unbounded_duration() {
        let exp = base().with_duration(-1).validate().unwrap();
        assert_eq!(exp.duration, RunDuration::Unbounded);
        assert!(exp.duration.limit().is_none());
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert_eq!(
            base().with_rate(0).validate().unwrap_err(),
            ConfigError::InvalidRate(0)
        );
        assert_eq!(
            base().with_concurrency(-3).validate().unwrap_err(),
            ConfigError::InvalidConcurrency(-3)
        );
        assert_eq!(
            base().with_duration(0).validate().unwrap_err(),
            ConfigError::InvalidDuration(0)
        );
        assert_eq!(
            base().with_duration(-2).validate().unwrap_err(),
            ConfigError::InvalidDuration(-2)
        );
    }

    #[test]
    fn test_rejects_bad_names() {
        let mut cfg = base();
        cfg.name = String::new();
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::MissingName);

        for bad in ["Exp", "1exp", "exp_1", "exp.1"] {
            let mut cfg = base();
            cfg.name = bad.into();
            assert!(matches!(
                cfg.validate().unwrap_err(),
                ConfigError::InvalidName(_)
            ));
        }
    }

    #[test]
    fn test_rejects_zero_targets() {
        let mut cfg = base();
        cfg.targets.clear();
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::NoTargets);
    }

    #[test]
    fn test_rejects_duplicate_targets() {
        let mut cfg = base();
        cfg.targets
            .push(TargetConfig::named("alpha", "http://other.example"));
        assert_eq!(
            cfg.validate().unwrap_err(),
            ConfigError::DuplicateTarget("alpha".into())
        );
    }

    #[test]
    fn test_rejects_target_path() {
        let mut cfg = base();
        cfg.targets = vec![TargetConfig::named("alpha", "http://alpha.example/ipfs")];
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::InvalidTarget { .. }
        ));
    }

    #[test]
    fn test_missing_base_url() {
        let mut cfg = base();
        cfg.targets = vec![TargetConfig::default()];
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::MissingBaseUrl(1));
    }

    #[test]
    fn test_default_target_name_from_host() {
        let mut cfg = base();
        cfg.targets = vec![TargetConfig {
            name: None,
            base_url: "http://gateway:8080".into(),
            host: None,
        }];
        let exp = cfg.validate().unwrap();
        assert_eq!(exp.targets[0].name(), "gateway");

        cfg.targets[0].base_url = "http://127.0.0.1:8080".into();
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::InvalidTargetName(_)
        ));
    }

    #[test]
    fn test_filter_tag() {
        let exp = base().with_filter("validpathonly").validate().unwrap();
        assert_eq!(exp.filter, RequestFilter::ValidPathOnly);
        assert!(matches!(
            base().with_filter("bogus").validate().unwrap_err(),
            ConfigError::InvalidFilter(_)
        ));
    }

    #[test]
    fn test_from_json_document() {
        let doc = r#"{
            "name": "gateway-compare",
            "rate": 20,
            "concurrency": 5,
            "duration": -1,
            "targets": [
                {"name": "kubo", "base_url": "http://kubo:8080"},
                {"base_url": "http://rainbow:8090", "host": "dweb.link"}
            ]
        }"#;
        let exp = ExperimentConfig::from_json(doc).unwrap().validate().unwrap();
        assert_eq!(exp.targets[0].name(), "kubo");
        assert_eq!(exp.targets[1].name(), "rainbow");
        assert_eq!(exp.targets[1].host_name(), "dweb.link");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"name":"f","rate":1,"concurrency":1,"duration":1,"targets":[{"name":"a","base_url":"http://a:1"}]}"#,
        )
        .unwrap();
        let cfg = ExperimentConfig::from_file(file.path()).unwrap();
        assert!(cfg.validate().is_ok());

        assert!(matches!(
            ExperimentConfig::from_file("/nonexistent/exp.json").unwrap_err(),
            ConfigError::Read { .. }
        ));
    }
}
