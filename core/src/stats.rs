//! Per-target accumulators and immutable snapshots

use std::time::Duration;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::timing::Outcome;

/// Summary of one timing distribution, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    /// Mean
    pub mean: f64,
    /// Exact minimum
    pub min: f64,
    /// Exact maximum
    pub max: f64,
    /// Median
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// 99.9th percentile
    pub p999: f64,
}

/// Smallest recordable latency, in microseconds
const LOWEST_MICROS: u64 = 1;
/// Largest recordable latency (one hour), in microseconds. Longer values saturate.
const HIGHEST_MICROS: u64 = 3_600_000_000;
/// Relative precision of recorded values
const SIGNIFICANT_FIGURES: u8 = 3;

/// A streaming timing distribution
///
/// Quantiles come from an HDR histogram with microsecond resolution, which
/// is mergeable and has a fixed footprint. Count, sum, minimum and maximum are
/// tracked exactly next to it.
#[derive(Debug, Clone)]
pub struct TimeMetric {
    histogram: Histogram<u64>,
    sum: f64,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl Default for TimeMetric {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeMetric {
    /// Create an empty distribution
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(LOWEST_MICROS, HIGHEST_MICROS, SIGNIFICANT_FIGURES)
            .expect("histogram bounds are valid");
        Self {
            histogram,
            sum: 0.0,
            min: None,
            max: None,
        }
    }

    /// Record one observation
    pub fn observe(&mut self, value: Duration) {
        self.add(value, 1);
    }

    /// Record `weight` observations of the same value. A zero weight is ignored.
    pub fn add(&mut self, value: Duration, weight: u64) {
        if weight == 0 {
            return;
        }
        let micros = u64::try_from(value.as_micros()).unwrap_or(u64::MAX);
        self.histogram.saturating_record_n(micros, weight);
        self.sum += value.as_secs_f64() * weight as f64;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    /// Fold another distribution into this one
    pub fn merge(&mut self, other: &TimeMetric) {
        if other.is_empty() {
            return;
        }
        if let Err(e) = self.histogram.add(&other.histogram) {
            tracing::warn!(error = ?e, "Failed to merge timing histograms");
            return;
        }
        self.sum += other.sum;
        self.min = self.min.into_iter().chain(other.min).min();
        self.max = self.max.into_iter().chain(other.max).max();
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    /// Whether nothing has been observed
    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Value at quantile `q`, kept within the exact minimum and maximum.
    /// Zero when empty.
    pub fn quantile(&self, q: f64) -> Duration {
        let (Some(min), Some(max)) = (self.min, self.max) else {
            return Duration::ZERO;
        };
        Duration::from_micros(self.histogram.value_at_quantile(q.clamp(0.0, 1.0))).clamp(min, max)
    }

    /// Summarise the distribution. All values are zero when empty.
    pub fn values(&self) -> MetricValues {
        if self.is_empty() {
            return MetricValues::default();
        }
        let q = |p: f64| self.quantile(p).as_secs_f64();
        MetricValues {
            mean: self.sum / self.count() as f64,
            min: self.min.unwrap_or_default().as_secs_f64(),
            max: self.max.unwrap_or_default().as_secs_f64(),
            p50: q(0.5),
            p75: q(0.75),
            p90: q(0.9),
            p95: q(0.95),
            p99: q(0.99),
            p999: q(0.999),
        }
    }
}

/// Running totals and distributions for one target, owned by the collector
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// Every outcome seen
    pub total_requests: u64,
    /// Requests that never reached the target
    pub total_dropped: u64,
    /// Transport failures
    pub total_connect_errors: u64,
    /// Timeouts and in-flight cancellations
    pub total_timeout_errors: u64,
    /// 1xx responses and anything outside 100..=599
    pub total_http_other: u64,
    /// 2xx responses
    pub total_http_2xx: u64,
    /// 3xx responses
    pub total_http_3xx: u64,
    /// 4xx responses
    pub total_http_4xx: u64,
    /// 5xx responses
    pub total_http_5xx: u64,
    /// TCP connect time of completed requests
    pub connect_time: TimeMetric,
    /// Time to first byte of completed requests
    pub ttfb: TimeMetric,
    /// Total time of completed requests
    pub total_time: TimeMetric,
}

impl BackendStats {
    /// Account for one outcome
    pub fn record(&mut self, outcome: &Outcome) {
        self.total_requests += 1;
        match outcome {
            Outcome::Dropped => self.total_dropped += 1,
            Outcome::ConnectError => self.total_connect_errors += 1,
            Outcome::TimeoutError => self.total_timeout_errors += 1,
            Outcome::Completed {
                status,
                connect_time,
                ttfb,
                total_time,
            } => {
                match status / 100 {
                    2 => self.total_http_2xx += 1,
                    3 => self.total_http_3xx += 1,
                    4 => self.total_http_4xx += 1,
                    5 => self.total_http_5xx += 1,
                    _ => self.total_http_other += 1,
                }
                self.connect_time.observe(*connect_time);
                self.ttfb.observe(*ttfb);
                self.total_time.observe(*total_time);
            }
        }
    }

    /// Produce an immutable snapshot
    pub fn sample(&self) -> MetricSample {
        MetricSample {
            total_requests: self.total_requests,
            total_dropped: self.total_dropped,
            total_connect_errors: self.total_connect_errors,
            total_timeout_errors: self.total_timeout_errors,
            total_http_other: self.total_http_other,
            total_http_2xx: self.total_http_2xx,
            total_http_3xx: self.total_http_3xx,
            total_http_4xx: self.total_http_4xx,
            total_http_5xx: self.total_http_5xx,
            connect_time: self.connect_time.values(),
            ttfb: self.ttfb.values(),
            total_time: self.total_time.values(),
        }
    }
}

/// Point-in-time view of one target's accumulated results
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Every outcome seen
    pub total_requests: u64,
    /// Requests that never reached the target
    pub total_dropped: u64,
    /// Transport failures
    pub total_connect_errors: u64,
    /// Timeouts and in-flight cancellations
    pub total_timeout_errors: u64,
    /// Responses outside the 2xx..5xx classes
    pub total_http_other: u64,
    /// 2xx responses
    pub total_http_2xx: u64,
    /// 3xx responses
    pub total_http_3xx: u64,
    /// 4xx responses
    pub total_http_4xx: u64,
    /// 5xx responses
    pub total_http_5xx: u64,
    /// TCP connect time, seconds
    pub connect_time: MetricValues,
    /// Time to first byte, seconds
    pub ttfb: MetricValues,
    /// Total request time, seconds
    pub total_time: MetricValues,
}

impl MetricSample {
    /// Requests that produced an HTTP response
    pub fn total_connected(&self) -> u64 {
        self.total_http_other
            + self.total_http_2xx
            + self.total_http_3xx
            + self.total_http_4xx
            + self.total_http_5xx
    }

    /// Requests actually sent to the target
    pub fn total_issued(&self) -> u64 {
        self.total_requests - self.total_dropped
    }

    /// Whether every request is accounted for by exactly one outcome
    pub fn is_balanced(&self) -> bool {
        self.total_requests
            == self.total_dropped
                + self.total_connect_errors
                + self.total_timeout_errors
                + self.total_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn completed(status: u16, ms: u64) -> Outcome {
        Outcome::Completed {
            status,
            connect_time: Duration::from_millis(ms / 4),
            ttfb: Duration::from_millis(ms / 2),
            total_time: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_empty_sample_is_zero() {
        let mut stats = BackendStats::default();
        let sample = stats.sample();
        assert_eq!(sample, MetricSample::default());
        assert!(sample.is_balanced());
    }

    #[test]
    fn test_record_buckets_outcomes() {
        let mut stats = BackendStats::default();
        stats.record(&Outcome::Dropped);
        stats.record(&Outcome::ConnectError);
        stats.record(&Outcome::TimeoutError);
        stats.record(&completed(200, 100));
        stats.record(&completed(204, 100));
        stats.record(&completed(301, 100));
        stats.record(&completed(404, 100));
        stats.record(&completed(502, 100));
        stats.record(&completed(101, 100));

        let s = stats.sample();
        assert_eq!(s.total_requests, 9);
        assert_eq!(s.total_dropped, 1);
        assert_eq!(s.total_connect_errors, 1);
        assert_eq!(s.total_timeout_errors, 1);
        assert_eq!(s.total_http_2xx, 2);
        assert_eq!(s.total_http_3xx, 1);
        assert_eq!(s.total_http_4xx, 1);
        assert_eq!(s.total_http_5xx, 1);
        assert_eq!(s.total_http_other, 1);
        assert_eq!(s.total_connected(), 6);
        assert_eq!(s.total_issued(), 8);
        assert!(s.is_balanced());
    }

    #[test]
    fn test_only_completed_feed_distributions() {
        let mut stats = BackendStats::default();
        stats.record(&Outcome::TimeoutError);
        stats.record(&Outcome::Dropped);
        assert_eq!(stats.total_time.count(), 0);

        stats.record(&completed(200, 40));
        stats.record(&completed(200, 80));
        assert_eq!(stats.total_time.count(), 2);

        let s = stats.sample();
        assert!((s.total_time.min - 0.040).abs() < 1e-9);
        assert!((s.total_time.max - 0.080).abs() < 1e-9);
        assert!((s.total_time.mean - 0.060).abs() < 1e-9);
        assert!((s.ttfb.max - 0.040).abs() < 1e-9);
        assert!((s.connect_time.min - 0.010).abs() < 1e-9);
    }

    #[test]
    fn test_sample_serializes() {
        let mut stats = BackendStats::default();
        stats.record(&completed(200, 10));
        let json = serde_json::to_string(&stats.sample()).unwrap();
        assert!(json.contains("\"total_http_2xx\":1"));
        assert!(json.contains("\"p99\""));
    }

    #[test]
    fn test_time_metric_empty() {
        let m = TimeMetric::new();
        assert!(m.is_empty());
        assert_eq!(m.quantile(0.5), Duration::ZERO);
        assert_eq!(m.values(), MetricValues::default());
    }

    #[test]
    fn test_time_metric_single_value() {
        let mut m = TimeMetric::new();
        m.observe(Duration::from_millis(250));
        for q in [0.0, 0.5, 0.99, 1.0] {
            assert_eq!(m.quantile(q), Duration::from_millis(250));
        }
        assert_eq!(m.values().mean, 0.25);
    }

    #[test]
    fn test_uniform_rank_error() {
        // Uniform values on [0, 1] scaled to microseconds.
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for n in [10_000usize, 1_000_000] {
            let mut m = TimeMetric::new();
            for _ in 0..n {
                m.observe(Duration::from_micros(rng.gen_range(0..=1_000_000)));
            }
            assert_eq!(m.count(), n as u64);
            for p in [0.5, 0.9, 0.95, 0.99] {
                let est = m.quantile(p).as_secs_f64();
                assert!((est - p).abs() <= 0.01, "n={n} p={p} est={est}");
            }
        }
    }

    #[test]
    fn test_weighted_add() {
        let mut m = TimeMetric::new();
        m.add(Duration::from_millis(1), 99);
        m.add(Duration::from_millis(100), 1);
        m.add(Duration::from_millis(500), 0);

        assert_eq!(m.count(), 100);
        assert!((m.quantile(0.5).as_secs_f64() - 0.001).abs() < 1e-5);
        assert_eq!(m.quantile(1.0), Duration::from_millis(100));
        assert_eq!(m.values().max, 0.1);
    }

    #[test]
    fn test_merge_matches_single_metric() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut whole = TimeMetric::new();
        let mut left = TimeMetric::new();
        let mut right = TimeMetric::new();
        for i in 0..20_000 {
            let x = Duration::from_micros(rng.gen_range(1_000..2_000_000));
            whole.observe(x);
            if i % 2 == 0 {
                left.observe(x);
            } else {
                right.observe(x);
            }
        }
        left.merge(&right);
        left.merge(&TimeMetric::new());

        assert_eq!(left.count(), whole.count());
        let (a, b) = (left.values(), whole.values());
        assert_eq!(a.min, b.min);
        assert_eq!(a.max, b.max);
        assert!((a.mean - b.mean).abs() < 1e-9);
        assert_eq!(a.p50, b.p50);
        assert_eq!(a.p99, b.p99);
    }

    #[test]
    fn test_long_values_saturate() {
        let mut m = TimeMetric::new();
        m.observe(Duration::from_secs(2 * 3600));
        assert_eq!(m.count(), 1);
        assert_eq!(m.values().max, 7200.0);
        assert_eq!(m.quantile(0.5), Duration::from_secs(2 * 3600));
    }
}
