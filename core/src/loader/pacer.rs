//! Tick pacing for the loader

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Paces the loader at a fixed global rate using governor
///
/// The quota allows a burst of one, so ticks are spaced `1s / rate` apart and
/// a slow consumer never earns a catch-up burst afterwards.
pub struct Pacer {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    rate: NonZeroU32,
}

impl Pacer {
    /// Create a pacer for `rate` ticks per second
    ///
    /// # Examples
    /// ```
    /// use std::num::NonZeroU32;
    /// use dealgood_core::loader::Pacer;
    ///
    /// let pacer = Pacer::new(NonZeroU32::new(10).unwrap());
    /// assert_eq!(pacer.interval().as_millis(), 100);
    /// ```
    pub fn new(rate: NonZeroU32) -> Self {
        let quota = Quota::per_second(rate).allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(quota),
            rate,
        }
    }

    /// Wait for the next tick
    ///
    /// The first tick is immediate.
    pub async fn tick(&self) {
        self.limiter.until_ready().await;
    }

    /// Time between ticks
    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate.get()
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("rate", &self.rate)
            .field("interval", &self.interval())
            .finish()
    }
}
