//! Error types for dealgood-core

use thiserror::Error;

use crate::experiment::ConfigError;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A builder was finalized without a required field
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// The request source failed terminally
    #[error("source: {0}")]
    Source(#[from] SourceError),

    /// Worker error
    #[error("worker error: {0}")]
    Worker(String),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Targets did not answer the readiness probe in time
    #[error("unable to connect to all targets within {timeout:?}: {message}")]
    NotReady {
        /// Overall probe timeout
        timeout: std::time::Duration,
        /// Last probe failure
        message: String,
    },

    /// The surrounding run was cancelled
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Shorthand for a builder missing a required field
    pub fn missing_config(field: &'static str) -> Self {
        Self::MissingConfig(field)
    }

    /// Shorthand for a worker-side failure
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Whether this error only reports cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Terminal errors reported by a request source.
///
/// Cloneable so `RequestSource::error` can be read any number of times after
/// the stream closes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source could not be started
    #[error("start {source_name}: {message}")]
    Start {
        /// Source name
        source_name: String,
        /// What went wrong
        message: String,
    },

    /// Reading from the underlying transport failed and cannot be retried
    #[error("read {source_name}: {message}")]
    Read {
        /// Source name
        source_name: String,
        /// What went wrong
        message: String,
    },

    /// The stream was already taken by another consumer
    #[error("stream for {0} already taken")]
    StreamTaken(String),
}

impl SourceError {
    /// Build a start error for the named source
    pub fn start(source_name: &str, message: impl std::fmt::Display) -> Self {
        Self::Start {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }

    /// Build a read error for the named source
    pub fn read(source_name: &str, message: impl std::fmt::Display) -> Self {
        Self::Read {
            source_name: source_name.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_display() {
        let err = SourceError::read("stdin", "broken pipe");
        assert_eq!(err.to_string(), "read stdin: broken pipe");

        let wrapped: Error = err.into();
        assert_eq!(wrapped.to_string(), "source: read stdin: broken pipe");
    }

    #[test]
    fn test_cancelled_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::worker("boom").is_cancelled());
    }

    #[test]
    fn test_missing_config_names_field() {
        let err = Error::missing_config("timings");
        assert!(err.to_string().contains("timings"));
    }
}
