//! Requests published to an SNS topic and consumed from an SQS queue
//!
//! Message bodies carry newline-delimited JSON requests, optionally wrapped in
//! an SNS notification envelope. Requests that do not fit in the stream buffer
//! are dropped rather than holding up the queue.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::Client;
use serde::Deserialize;
use tokio::sync::mpsc;

use dealgood_core::metrics::SourceMetrics;
use dealgood_core::{source_channel, Offer, Request, RequestFilter, RequestSource, SourceError};
use dealgood_core::{SourceHandle, SourceSink};

use crate::backoff::Backoff;

/// Source name reported for SQS
pub const SQS_SOURCE: &str = "sqs";

const BATCH_SIZE: i32 = 10;
const VISIBILITY_TIMEOUT_SECS: i32 = 5;
const WAIT_TIME_SECS: i32 = 10;

/// Queue to consume
#[derive(Debug, Clone, Default)]
pub struct SqsConfig {
    /// Queue name
    pub queue: String,
    /// AWS region; the default provider chain is used when unset
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Message")]
    message: String,
}

/// The request payload of a queue message, unwrapping SNS notifications
pub fn unwrap_sns(body: &str) -> std::borrow::Cow<'_, str> {
    match serde_json::from_str::<SnsEnvelope>(body) {
        Ok(env) if env.kind == "Notification" => std::borrow::Cow::Owned(env.message),
        _ => std::borrow::Cow::Borrowed(body),
    }
}

/// Counts of what happened to the lines of one message
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BodyOutcome {
    /// Requests queued for the loader
    pub accepted: usize,
    /// Requests rejected by the filter
    pub filtered: usize,
    /// Requests discarded because the stream was full
    pub dropped: usize,
    /// The stream closed while processing
    pub closed: bool,
}

/// Decode each line of a message body and offer it to the stream
pub fn offer_body(sink: &SourceSink, body: &str) -> BodyOutcome {
    let payload = unwrap_sns(body);
    let mut outcome = BodyOutcome::default();
    for line in payload.lines() {
        let Some(req) = sink.decode(line) else {
            continue;
        };
        match sink.offer(req) {
            Offer::Accepted => outcome.accepted += 1,
            Offer::Filtered => outcome.filtered += 1,
            Offer::Dropped => outcome.dropped += 1,
            Offer::Closed => {
                outcome.closed = true;
                break;
            }
        }
    }
    outcome
}

/// Long-polls an SQS queue
pub struct SqsSource {
    handle: SourceHandle,
    sink: Option<SourceSink>,
    config: SqsConfig,
}

impl SqsSource {
    /// Create a consumer whose stream buffers `capacity` requests
    pub fn new(config: SqsConfig, capacity: usize, filter: RequestFilter, metrics: SourceMetrics) -> Self {
        let (handle, sink) = source_channel(SQS_SOURCE, capacity, filter, metrics);
        Self {
            handle,
            sink: Some(sink),
            config,
        }
    }
}

#[async_trait]
impl RequestSource for SqsSource {
    fn name(&self) -> &str {
        self.handle.name()
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        let Some(sink) = self.sink.take() else {
            return Err(SourceError::start(SQS_SOURCE, "already started"));
        };

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let client = Client::new(&loader.load().await);

        let queue_url = client
            .get_queue_url()
            .queue_name(&self.config.queue)
            .send()
            .await
            .map_err(|e| SourceError::start(SQS_SOURCE, format!("get queue url {}: {e}", self.config.queue)))?
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| SourceError::start(SQS_SOURCE, format!("no url for queue {}", self.config.queue)))?;
        tracing::info!(queue_url = %queue_url, "Found queue");

        tokio::spawn(poll(client, queue_url, sink));
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

async fn poll(client: Client, queue_url: String, sink: SourceSink) {
    let mut backoff = Backoff::default();
    let mut connected = true;
    sink.set_connected(true);
    'outer: loop {
        let received = tokio::select! {
            biased;
            _ = sink.stop_token().cancelled() => break,
            received = client
                .receive_message()
                .queue_url(&queue_url)
                .max_number_of_messages(BATCH_SIZE)
                .visibility_timeout(VISIBILITY_TIMEOUT_SECS)
                .wait_time_seconds(WAIT_TIME_SECS)
                .send() => received,
        };

        let output = match received {
            Ok(output) => output,
            Err(e) => {
                sink.metrics().errors.inc();
                if connected {
                    sink.set_connected(false);
                    connected = false;
                }
                tracing::warn!(error = %e, "Failed to receive messages");
                if !backoff.wait(&sink).await {
                    break;
                }
                continue;
            }
        };
        if !connected {
            tracing::info!(queue_url = %queue_url, "Receiving from queue again");
            sink.set_connected(true);
            connected = true;
            backoff.reset();
        }

        for msg in output.messages() {
            let Some(body) = msg.body() else {
                sink.metrics().errors.inc();
                tracing::warn!(message_id = ?msg.message_id(), "Message body was empty");
                continue;
            };

            let outcome = offer_body(&sink, body);
            if outcome.dropped > 0 {
                tracing::debug!(dropped = outcome.dropped, "Stream full, dropped requests");
            }

            if let Some(receipt) = msg.receipt_handle() {
                if let Err(e) = client
                    .delete_message()
                    .queue_url(&queue_url)
                    .receipt_handle(receipt)
                    .send()
                    .await
                {
                    sink.metrics().errors.inc();
                    tracing::warn!(error = %e, "Failed to delete message");
                }
            }

            if outcome.closed {
                break 'outer;
            }
        }
    }
    sink.close();
}
