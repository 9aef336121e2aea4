//! Per-request outcomes emitted by workers and the loader

use std::time::Duration;

/// Final state of one request against one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The target's workers were all busy and the request was never issued
    Dropped,
    /// DNS, TCP, TLS or other transport failure
    ConnectError,
    /// The request exceeded its timeout or was cancelled in flight
    TimeoutError,
    /// An HTTP response was received
    Completed {
        /// HTTP status code
        status: u16,
        /// Time to establish the TCP connection
        connect_time: Duration,
        /// Time from request start to response headers
        ttfb: Duration,
        /// Time from request start to the end of the body
        total_time: Duration,
    },
}

impl Outcome {
    /// Status class (2 for 2xx etc) of a completed request
    pub fn status_class(&self) -> Option<u16> {
        match self {
            Self::Completed { status, .. } => Some(status / 100),
            _ => None,
        }
    }

    /// Whether the request completed with a 2xx status
    pub fn is_success(&self) -> bool {
        self.status_class() == Some(2)
    }
}

/// One outcome tagged with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTiming {
    /// Experiment name
    pub experiment: String,
    /// Target name
    pub target: String,
    /// What happened
    pub outcome: Outcome,
}

impl RequestTiming {
    /// Create a timing
    pub fn new(experiment: impl Into<String>, target: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            experiment: experiment.into(),
            target: target.into(),
            outcome,
        }
    }

    /// A synthesized timing for a request the target could not accept
    pub fn dropped(experiment: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(experiment, target, Outcome::Dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class() {
        let done = Outcome::Completed {
            status: 404,
            connect_time: Duration::from_millis(1),
            ttfb: Duration::from_millis(2),
            total_time: Duration::from_millis(3),
        };
        assert_eq!(done.status_class(), Some(4));
        assert!(!done.is_success());
        assert_eq!(Outcome::Dropped.status_class(), None);
        assert_eq!(Outcome::TimeoutError.status_class(), None);
    }

    #[test]
    fn test_dropped_constructor() {
        let t = RequestTiming::dropped("exp", "a");
        assert_eq!(t.outcome, Outcome::Dropped);
        assert_eq!(t.experiment, "exp");
        assert_eq!(t.target, "a");
    }
}
