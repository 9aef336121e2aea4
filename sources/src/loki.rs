//! Live gateway traffic tailed from Loki over a WebSocket
//!
//! Each log entry is an nginx JSON access-log line. The first connection is
//! made in `start`, so bad credentials or an unreachable server fail the run
//! immediately; later disconnects are retried with capped exponential backoff.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request as WsRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use dealgood_core::metrics::SourceMetrics;
use dealgood_core::{source_channel, Request, RequestFilter, RequestSource, SourceError};
use dealgood_core::{SourceHandle, SourceSink};

use crate::backoff::Backoff;

/// Source name reported for Loki
pub const LOKI_SOURCE: &str = "loki";

const TAIL_PATH: &str = "/loki/api/v1/tail";
const TAIL_LIMIT: u32 = 100;
const TAIL_LOOKBACK_MINUTES: i64 = 60;
const USER_AGENT: &str = "dealgood/0.1";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for a Loki tail
#[derive(Debug, Clone, Default)]
pub struct LokiConfig {
    /// Base URI of the Loki server, e.g. `https://logs-prod-us-central1.grafana.net`
    pub uri: String,
    /// Basic auth user
    pub username: Option<String>,
    /// Basic auth password or API token
    pub password: Option<String>,
    /// LogQL query selecting the access-log stream
    pub query: String,
    /// Tenant sent as `X-Scope-OrgID`
    pub org_id: Option<String>,
    /// Value sent as `X-Query-Tags`
    pub query_tags: Option<String>,
}

impl LokiConfig {
    /// The WebSocket tail URL, starting an hour before `now`
    pub fn tail_url(&self, now: DateTime<Utc>) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.uri)
            .map_err(|e| SourceError::start(LOKI_SOURCE, format!("invalid uri {:?}: {e}", self.uri)))?;

        let ws_scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SourceError::start(
                    LOKI_SOURCE,
                    format!("unsupported scheme {other:?}"),
                ))
            }
        };
        url.set_scheme(ws_scheme)
            .map_err(|_| SourceError::start(LOKI_SOURCE, "unable to switch to websocket scheme"))?;

        let path = format!("{}{TAIL_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);

        let start = now - chrono::Duration::minutes(TAIL_LOOKBACK_MINUTES);
        let start_ns = start.timestamp_nanos_opt().unwrap_or_default();
        url.query_pairs_mut()
            .clear()
            .append_pair("query", &self.query)
            .append_pair("limit", &TAIL_LIMIT.to_string())
            .append_pair("start", &start_ns.to_string());
        Ok(url)
    }

    /// The handshake request with authentication and tenant headers
    pub fn client_request(&self, now: DateTime<Utc>) -> Result<WsRequest, SourceError> {
        let url = self.tail_url(now)?;
        let mut req = url
            .as_str()
            .into_client_request()
            .map_err(|e| SourceError::start(LOKI_SOURCE, e))?;

        let mut headers = vec![("User-Agent", USER_AGENT.to_string())];
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            if !user.is_empty() && !pass.is_empty() {
                let token = STANDARD.encode(format!("{user}:{pass}"));
                headers.push(("Authorization", format!("Basic {token}")));
            }
        }
        if let Some(org) = self.org_id.as_deref().filter(|v| !v.is_empty()) {
            headers.push(("X-Scope-OrgID", org.to_string()));
        }
        if let Some(tags) = self.query_tags.as_deref().filter(|v| !v.is_empty()) {
            headers.push(("X-Query-Tags", tags.to_string()));
        }

        for (name, value) in headers {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| SourceError::start(LOKI_SOURCE, format!("header {name}: {e}")))?;
            req.headers_mut().insert(name, value);
        }
        Ok(req)
    }

    async fn connect(&self) -> Result<WsStream, SourceError> {
        let req = self.client_request(Utc::now())?;
        let (ws, _) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|e| SourceError::read(LOKI_SOURCE, format!("connect {}: {e}", self.uri)))?;
        tracing::info!(uri = %self.uri, "Connected to loki");
        Ok(ws)
    }
}

/// A batch of log entries pushed by the tail endpoint
#[derive(Debug, Deserialize, Default)]
pub struct TailResponse {
    /// Entries grouped by label set
    #[serde(default)]
    pub streams: Vec<TailStream>,
}

/// Entries sharing one label set
#[derive(Debug, Deserialize)]
pub struct TailStream {
    /// Stream labels
    #[serde(default, rename = "stream")]
    pub labels: HashMap<String, String>,
    /// `[timestamp_ns, line]` pairs
    #[serde(default)]
    pub values: Vec<(String, String)>,
}

/// One nginx JSON access-log line
#[derive(Debug, Deserialize)]
pub struct LogLine {
    /// Gateway that served the request
    #[serde(default)]
    pub server: Option<String>,
    /// When the request was served
    pub time: Option<DateTime<Utc>>,
    /// HTTP method
    #[serde(default)]
    pub method: String,
    /// Request uri
    #[serde(default)]
    pub uri: String,
    /// Response status
    #[serde(default)]
    pub status: Option<u16>,
    /// Request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Client address
    #[serde(default)]
    pub addr: Option<String>,
    /// Client user agent
    #[serde(default)]
    pub agent: Option<String>,
    /// Referer
    #[serde(default)]
    pub referer: Option<String>,
    /// Response body size in bytes
    #[serde(default)]
    pub resp_body_size: Option<i64>,
    /// Response time in seconds
    #[serde(default)]
    pub resp_time: Option<f64>,
}

impl From<LogLine> for Request {
    fn from(line: LogLine) -> Self {
        let mut req = Request::new(line.method, line.uri);
        req.header = line.headers;
        req.status = line.status;
        req.timestamp = line.time;
        req.remote_addr = line.addr;
        req.agent = line.agent;
        req.referer = line.referer;
        req.resp_body_size = line.resp_body_size;
        req.resp_time = line.resp_time;
        req
    }
}

/// Tails a Loki query and replays each access-log entry
pub struct LokiSource {
    handle: SourceHandle,
    sink: Option<SourceSink>,
    config: LokiConfig,
    backoff: Backoff,
}

impl LokiSource {
    /// Create a tail whose stream buffers `capacity` requests
    pub fn new(
        config: LokiConfig,
        capacity: usize,
        filter: RequestFilter,
        metrics: SourceMetrics,
    ) -> Self {
        let (handle, sink) = source_channel(LOKI_SOURCE, capacity, filter, metrics);
        Self {
            handle,
            sink: Some(sink),
            config,
            backoff: Backoff::default(),
        }
    }

    /// Reconnect delays, doubling from `initial` up to `max`
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(initial, max);
        self
    }
}

#[async_trait]
impl RequestSource for LokiSource {
    fn name(&self) -> &str {
        self.handle.name()
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        let Some(sink) = self.sink.take() else {
            return Err(SourceError::start(LOKI_SOURCE, "already started"));
        };
        let ws = match self.config.connect().await {
            Ok(ws) => ws,
            Err(e) => {
                sink.metrics().errors.inc();
                return Err(SourceError::start(LOKI_SOURCE, e));
            }
        };
        let tailer = Tailer {
            config: self.config.clone(),
            backoff: self.backoff.clone(),
            sink,
        };
        tokio::spawn(tailer.run(ws));
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

struct Tailer {
    config: LokiConfig,
    backoff: Backoff,
    sink: SourceSink,
}

impl Tailer {
    async fn run(mut self, mut ws: WsStream) {
        self.sink.set_connected(true);
        loop {
            let next = tokio::select! {
                biased;
                _ = self.sink.stop_token().cancelled() => break,
                next = ws.next() => next,
            };

            let payload = match next {
                Some(Ok(Message::Text(text))) => Some(text),
                Some(Ok(Message::Binary(data))) => Some(String::from_utf8_lossy(&data).into_owned()),
                Some(Ok(Message::Close(_))) | None => {
                    tracing::warn!("Loki closed the tail");
                    None
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to read tail from loki");
                    None
                }
            };

            let Some(payload) = payload else {
                self.sink.set_connected(false);
                self.sink.metrics().errors.inc();
                match self.reconnect().await {
                    Some(fresh) => {
                        ws = fresh;
                        self.sink.set_connected(true);
                        continue;
                    }
                    None => break,
                }
            };

            if !self.forward(&payload).await {
                break;
            }
        }

        let _ = ws.close(None).await;
        self.sink.close();
    }

    /// Returns `None` once the source is stopped
    async fn reconnect(&mut self) -> Option<WsStream> {
        self.backoff.reset();
        loop {
            if !self.backoff.wait(&self.sink).await {
                return None;
            }
            match self.config.connect().await {
                Ok(ws) => return Some(ws),
                Err(e) => {
                    self.sink.metrics().errors.inc();
                    tracing::warn!(error = %e, "Failed to reconnect to loki");
                }
            }
        }
    }

    /// Returns `false` when the source should stop
    async fn forward(&self, payload: &str) -> bool {
        let tail: TailResponse = match serde_json::from_str(payload) {
            Ok(tail) => tail,
            Err(e) => {
                self.sink.metrics().errors.inc();
                tracing::debug!(error = %e, "Failed to parse loki tail response");
                return true;
            }
        };

        for (_, line) in tail.streams.iter().flat_map(|s| s.values.iter()) {
            let entry: LogLine = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    self.sink.metrics().incoming.inc();
                    self.sink.metrics().errors.inc();
                    tracing::debug!(error = %e, "Failed to parse loki log line");
                    continue;
                }
            };
            if !self.sink.send(entry.into()).await {
                return false;
            }
        }
        true
    }
}
