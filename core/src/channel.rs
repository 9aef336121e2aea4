//! Channel sizing for loader, worker and source communication

use std::time::Duration;

/// Channel buffer configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Timings channel buffer size (workers and loader -> collector)
    pub timings_buffer: usize,

    /// Stream buffer for sources that produce on demand (stdin, random)
    pub source_buffer: usize,

    /// How much traffic a streaming source (Loki, SQS) buffers ahead of the loader
    pub streaming_backlog: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timings_buffer: 10_000,
            source_buffer: 1,
            streaming_backlog: Duration::from_secs(30 * 60),
        }
    }
}

impl ChannelConfig {
    /// Create a new channel config with a custom timings buffer size
    pub fn with_timings_buffer(mut self, size: usize) -> Self {
        self.timings_buffer = size;
        self
    }

    /// Set the on-demand source buffer size
    pub fn with_source_buffer(mut self, size: usize) -> Self {
        self.source_buffer = size;
        self
    }

    /// Stream buffer size for a streaming source at `rate` requests per second
    pub fn streaming_buffer(&self, rate: u32) -> usize {
        let secs = self.streaming_backlog.as_secs().max(1) as usize;
        (rate as usize).saturating_mul(secs).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.timings_buffer, 10_000);
        assert_eq!(config.source_buffer, 1);
    }

    #[test]
    fn test_channel_config_builder() {
        let config = ChannelConfig::default()
            .with_timings_buffer(5000)
            .with_source_buffer(16);
        assert_eq!(config.timings_buffer, 5000);
        assert_eq!(config.source_buffer, 16);
    }

    #[test]
    fn test_streaming_buffer_holds_thirty_minutes() {
        let config = ChannelConfig::default();
        assert_eq!(config.streaming_buffer(100), 100 * 60 * 30);
        assert_eq!(config.streaming_buffer(1), 1800);
    }
}
