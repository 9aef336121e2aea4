//! Worker statistics tracking

use std::time::Instant;

use crate::timing::Outcome;

/// Statistics tracked by each worker
#[derive(Debug, Default, Clone)]
pub struct WorkerStats {
    /// Requests that received an HTTP response
    pub completed: usize,

    /// Requests that failed to connect
    pub connect_errors: usize,

    /// Requests that timed out or were cancelled in flight
    pub timeouts: usize,

    /// Worker start time
    pub started_at: Option<Instant>,

    /// Worker end time
    pub ended_at: Option<Instant>,
}

impl WorkerStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Get total number of requests handled
    pub fn total_requests(&self) -> usize {
        self.completed + self.connect_errors + self.timeouts
    }

    /// Failed requests of either kind
    pub fn errors(&self) -> usize {
        self.connect_errors + self.timeouts
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Get requests per second
    pub fn requests_per_second(&self) -> f64 {
        self.elapsed()
            .map(|d| {
                let secs = d.as_secs_f64();
                if secs > 0.0 {
                    self.total_requests() as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0)
    }

    /// Record the outcome of one request
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed { .. } => self.completed += 1,
            Outcome::ConnectError => self.connect_errors += 1,
            Outcome::TimeoutError => self.timeouts += 1,
            Outcome::Dropped => {}
        }
    }

    /// Merge stats from another worker
    pub fn merge(&mut self, other: &WorkerStats) {
        self.completed += other.completed;
        self.connect_errors += other.connect_errors;
        self.timeouts += other.timeouts;
    }
}
