//! Request source abstraction
//!
//! A [`RequestSource`] produces a bounded stream of [`Request`]s. The trait is
//! defined here so the loader can drive any source; implementations live in
//! the `dealgood-sources` crate.
//!
//! Sources are built from a [`SourceHandle`] (kept by the source object and
//! used to answer `stream`, `stop` and `error`) and a [`SourceSink`] (moved
//! into the source's reader task). Dropping the sink closes the stream, so the
//! stream is closed exactly once, when the reader task finishes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::filter::RequestFilter;
use crate::metrics::SourceMetrics;
use crate::request::Request;

/// Producer of replayable requests
#[async_trait]
pub trait RequestSource: Send + Sync {
    /// Name used in logs, metrics and reports
    fn name(&self) -> &str;

    /// Begin producing requests. Returns once the reader task is running.
    async fn start(&mut self) -> Result<(), SourceError>;

    /// Take the receiving end of the stream. Returns `None` once taken.
    fn stream(&mut self) -> Option<mpsc::Receiver<Request>>;

    /// Ask the source to stop. Idempotent and non-blocking.
    fn stop(&self);

    /// Terminal error, available after the stream closed because of a failure
    fn error(&self) -> Option<SourceError>;
}

/// Result of offering a request to a sink without waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued for the loader
    Accepted,
    /// Rejected by the request filter
    Filtered,
    /// Stream buffer full; the request was discarded
    Dropped,
    /// The stream was closed or the source stopped
    Closed,
}

type ErrorSlot = Arc<Mutex<Option<SourceError>>>;

/// Create a connected handle and sink for a source with the given stream capacity
pub fn source_channel(
    name: &str,
    capacity: usize,
    filter: RequestFilter,
    metrics: SourceMetrics,
) -> (SourceHandle, SourceSink) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stop = CancellationToken::new();
    let error: ErrorSlot = Arc::new(Mutex::new(None));

    let handle = SourceHandle {
        name: name.to_string(),
        stream: Some(rx),
        stop: stop.clone(),
        error: Arc::clone(&error),
    };
    let sink = SourceSink {
        name: name.to_string(),
        tx,
        filter,
        metrics,
        stop,
        error,
    };
    (handle, sink)
}

/// The consumer-facing half kept by a source
pub struct SourceHandle {
    name: String,
    stream: Option<mpsc::Receiver<Request>>,
    stop: CancellationToken,
    error: ErrorSlot,
}

impl SourceHandle {
    /// Source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the stream receiver
    pub fn take_stream(&mut self) -> Option<mpsc::Receiver<Request>> {
        self.stream.take()
    }

    /// Signal the reader task to stop
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether stop was requested
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Terminal error, if the reader failed
    pub fn error(&self) -> Option<SourceError> {
        match self.error.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("name", &self.name)
            .field("stream_taken", &self.stream.is_none())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// The producer-facing half moved into a source's reader task
pub struct SourceSink {
    name: String,
    tx: mpsc::Sender<Request>,
    filter: RequestFilter,
    metrics: SourceMetrics,
    stop: CancellationToken,
    error: ErrorSlot,
}

impl SourceSink {
    /// Source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metrics for this source
    pub fn metrics(&self) -> &SourceMetrics {
        &self.metrics
    }

    /// Filter applied before enqueueing
    pub fn filter(&self) -> RequestFilter {
        self.filter
    }

    /// Token cancelled when the source is asked to stop
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Whether the source was asked to stop or the consumer went away
    pub fn is_done(&self) -> bool {
        self.stop.is_cancelled() || self.tx.is_closed()
    }

    /// Count the request as incoming and apply the filter
    pub fn admit(&self, req: &Request) -> bool {
        self.metrics.incoming.inc();
        if self.filter.matches(req) {
            true
        } else {
            self.metrics.filtered.inc();
            false
        }
    }

    /// Decode one NDJSON line, counting malformed input as an error
    pub fn decode(&self, line: &str) -> Option<Request> {
        if line.trim().is_empty() {
            return None;
        }
        match Request::from_json_line(line) {
            Ok(req) => Some(req),
            Err(e) => {
                self.metrics.errors.inc();
                tracing::debug!(source = %self.name, error = %e, "Skipping malformed request");
                None
            }
        }
    }

    /// Filter and enqueue a request, waiting for buffer space.
    ///
    /// Returns `false` when the source should stop producing.
    pub async fn send(&self, req: Request) -> bool {
        if !self.admit(&req) {
            return !self.is_done();
        }
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            sent = self.tx.send(req) => sent.is_ok(),
        }
    }

    /// Filter and enqueue a request without waiting; full buffers drop it
    pub fn offer(&self, req: Request) -> Offer {
        if self.stop.is_cancelled() {
            return Offer::Closed;
        }
        if !self.admit(&req) {
            return Offer::Filtered;
        }
        match self.tx.try_send(req) {
            Ok(()) => Offer::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.dropped.inc();
                Offer::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Mark the transport as up or down
    pub fn set_connected(&self, connected: bool) {
        self.metrics.connected.set(i64::from(connected));
    }

    /// Record a terminal error and close the stream
    pub fn fail(self, err: SourceError) {
        tracing::error!(source = %self.name, error = %err, "Source failed");
        self.metrics.errors.inc();
        match self.error.lock() {
            Ok(mut slot) => *slot = Some(err),
            Err(poisoned) => *poisoned.into_inner() = Some(err),
        }
        self.set_connected(false);
    }

    /// Close the stream without an error
    pub fn close(self) {
        self.set_connected(false);
        tracing::debug!(source = %self.name, "Source closed");
    }
}

impl std::fmt::Debug for SourceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSink")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("done", &self.is_done())
            .finish()
    }
}
