//! Endless replay of a fixed request list in random order

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use dealgood_core::metrics::SourceMetrics;
use dealgood_core::{source_channel, Request, RequestFilter, RequestSource, SourceError};
use dealgood_core::{SourceHandle, SourceSink};

/// Emits a uniformly random request from a preloaded list, stamped with the
/// current time. The stream never ends on its own.
pub struct RandomSource {
    handle: SourceHandle,
    sink: Option<SourceSink>,
    requests: Vec<Request>,
    rng: Option<StdRng>,
}

impl RandomSource {
    /// Serve `requests` under the name `random` through a stream of `capacity`
    pub fn new(requests: Vec<Request>, capacity: usize, filter: RequestFilter, metrics: SourceMetrics) -> Self {
        Self::named("random", requests, capacity, filter, metrics)
    }

    /// Serve `requests` under the given source name
    pub fn named(
        name: &str,
        requests: Vec<Request>,
        capacity: usize,
        filter: RequestFilter,
        metrics: SourceMetrics,
    ) -> Self {
        let (handle, sink) = source_channel(name, capacity, filter, metrics);
        Self {
            handle,
            sink: Some(sink),
            requests,
            rng: Some(StdRng::from_entropy()),
        }
    }

    /// Use a deterministic generator
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Some(StdRng::seed_from_u64(seed));
        self
    }

    /// Number of requests in the list
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[async_trait]
impl RequestSource for RandomSource {
    fn name(&self) -> &str {
        self.handle.name()
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        let (Some(sink), Some(rng)) = (self.sink.take(), self.rng.take()) else {
            return Err(SourceError::start(self.handle.name(), "already started"));
        };
        if self.requests.is_empty() {
            return Err(SourceError::start(self.handle.name(), "no requests to replay"));
        }
        // A list the filter rejects entirely would spin without emitting.
        let filter = sink.filter();
        if !self.requests.iter().any(|r| filter.matches(r)) {
            return Err(SourceError::start(
                self.handle.name(),
                format!("no request passes the {filter} filter"),
            ));
        }

        let requests = std::mem::take(&mut self.requests);
        tracing::debug!(source = %sink.name(), requests = requests.len(), "Starting random replay");
        tokio::spawn(replay(requests, rng, sink));
        Ok(())
    }

    fn stream(&mut self) -> Option<mpsc::Receiver<Request>> {
        self.handle.take_stream()
    }

    fn stop(&self) {
        self.handle.stop();
    }

    fn error(&self) -> Option<SourceError> {
        self.handle.error()
    }
}

async fn replay(requests: Vec<Request>, mut rng: StdRng, sink: SourceSink) {
    sink.set_connected(true);
    loop {
        let idx = rng.gen_range(0..requests.len());
        let req = requests[idx].clone().with_timestamp(Utc::now());
        if !sink.send(req).await {
            break;
        }
        if sink.is_done() {
            break;
        }
        // Filtered picks return without awaiting anything.
        tokio::task::yield_now().await;
    }
    sink.close();
}
