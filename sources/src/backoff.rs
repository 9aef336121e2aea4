//! Capped exponential delays between attempts to reach a remote source

use std::time::Duration;

use dealgood_core::SourceSink;

/// First retry delay
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Longest retry delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Doubling delay, capped at a maximum and reset after a success
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl Backoff {
    /// Delays start at `initial` and never exceed `max`
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.next = self.initial;
    }

    /// Sleep for the next delay. Returns `false` if the source was stopped meanwhile.
    pub async fn wait(&mut self, sink: &SourceSink) -> bool {
        let delay = self.next_delay();
        tokio::select! {
            biased;
            _ = sink.stop_token().cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealgood_core::{source_channel, Metrics, RequestFilter};

    #[test]
    fn test_delays_double_up_to_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 30, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), DEFAULT_INITIAL_DELAY);
    }

    #[test]
    fn test_max_below_initial() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_then_stops() {
        let metrics = Metrics::new().unwrap();
        let (_handle, sink) = source_channel("test", 1, RequestFilter::None, metrics.source("exp", "test"));
        let mut backoff = Backoff::default();

        let start = tokio::time::Instant::now();
        assert!(backoff.wait(&sink).await);
        assert!(backoff.wait(&sink).await);
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        sink.stop_token().cancel();
        assert!(!backoff.wait(&sink).await);
    }
}
