//! Instrumented HTTP exchange against one target
//!
//! Every request opens a fresh connection so connect time is measured on each
//! call. Timings are taken from a single start instant:
//! connect time spans the TCP handshake, TTFB ends when response headers
//! arrive and total time ends once the body is fully read (or aborted).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONNECTION, HOST};
use http::uri::{PathAndQuery, Scheme as UriScheme};
use http::{Method, Uri};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};
use crate::request::Request;
use crate::target::{Scheme, Target};
use crate::timing::Outcome;

use super::tls::{insecure_connector, ALPN_H2};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Host value used by captured logs in place of the real host
const PLACEHOLDER_HOST: &str = "backend";

/// Headers that describe the original connection and are never replayed
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "content-length",
];

/// Why an exchange failed
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The exchange ran out of time
    #[error("timeout")]
    Timeout,
    /// Anything else that prevented a response
    #[error("{0}")]
    Connect(String),
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Self::Timeout
        } else {
            Self::Connect(e.to_string())
        }
    }
}

impl From<hyper::Error> for FetchError {
    fn from(e: hyper::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Connect(e.to_string())
        }
    }
}

impl From<http::Error> for FetchError {
    fn from(e: http::Error) -> Self {
        Self::Connect(e.to_string())
    }
}

impl FetchError {
    /// Map the failure onto a request outcome
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Timeout => Outcome::TimeoutError,
            Self::Connect(_) => Outcome::ConnectError,
        }
    }
}

/// Aborts the spawned connection driver when the exchange ends
struct ConnectionGuard(tokio::task::AbortHandle);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// HTTP client bound to one target
pub struct TargetClient {
    target: Arc<Target>,
    tls: Option<TlsConnector>,
    timeout: Duration,
}

impl TargetClient {
    /// Create a client for `target`
    pub fn new(target: Arc<Target>, timeout: Duration) -> Result<Self> {
        let tls = match target.scheme() {
            Scheme::Http => None,
            Scheme::Https => Some(
                insecure_connector().map_err(|e| Error::worker(format!("tls config: {e}")))?,
            ),
        };
        Ok(Self {
            target,
            tls,
            timeout,
        })
    }

    /// The target this client talks to
    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    /// Issue one request and classify the result
    pub async fn execute(&self, req: &Request) -> Outcome {
        match self.try_execute(req).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::trace!(target_name = %self.target.name(), uri = %req.uri, error = %e, "Request failed");
                e.outcome()
            }
        }
    }

    /// Issue one request, reporting why it failed
    pub async fn try_execute(&self, req: &Request) -> std::result::Result<Outcome, FetchError> {
        match tokio::time::timeout(self.timeout, self.exchange(req)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    /// Host header value for a request
    pub fn host_for(&self, req: &Request) -> String {
        if self.target.has_host_override() {
            return self.target.host_name().to_string();
        }
        match req.header_value("host") {
            Some(h) if !h.is_empty() && h != PLACEHOLDER_HOST => h.to_string(),
            _ => self.target.host_name().to_string(),
        }
    }

    async fn exchange(&self, req: &Request) -> std::result::Result<Outcome, FetchError> {
        let start = Instant::now();
        let path: PathAndQuery = req
            .uri
            .parse()
            .map_err(|e| FetchError::Connect(format!("invalid uri {:?}: {e}", req.uri)))?;

        let host_port = self.target.host_port();
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(host_port.as_str()).await?.collect();

        let connect_start = Instant::now();
        let tcp = connect_any(&addrs, &host_port).await?;
        let connect_time = connect_start.elapsed();
        let _ = tcp.set_nodelay(true);

        let (response, _guard) = match &self.tls {
            None => {
                let outbound = self.build_request(req, path, false)?;
                send_http1(TokioIo::new(tcp), outbound).await?
            }
            Some(tls) => {
                let server_name = ServerName::try_from(self.target.host_name().to_string())
                    .map_err(|e| FetchError::Connect(format!("invalid server name: {e}")))?;
                let stream = tls.connect(server_name, tcp).await?;
                let h2 = stream.get_ref().1.alpn_protocol() == Some(ALPN_H2);
                let outbound = self.build_request(req, path, h2)?;
                if h2 {
                    send_http2(TokioIo::new(stream), outbound).await?
                } else {
                    send_http1(TokioIo::new(stream), outbound).await?
                }
            }
        };
        let ttfb = start.elapsed();
        let status = response.status().as_u16();

        let mut body = response.into_body();
        while let Some(frame) = body.frame().await {
            if frame.is_err() {
                break;
            }
        }
        let total_time = start.elapsed();

        Ok(Outcome::Completed {
            status,
            connect_time,
            ttfb,
            total_time,
        })
    }

    /// Outbound requests are always `GET` without a body, whatever the origin method was
    fn build_request(
        &self,
        req: &Request,
        path: PathAndQuery,
        h2: bool,
    ) -> std::result::Result<http::Request<Empty<Bytes>>, FetchError> {
        let host = self.host_for(req);

        let uri = if h2 {
            Uri::builder()
                .scheme(UriScheme::HTTPS)
                .authority(host.as_str())
                .path_and_query(path)
                .build()?
        } else {
            Uri::from(path)
        };

        let mut builder = http::Request::builder().method(Method::GET).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &req.header {
                if SKIPPED_HEADERS.iter().any(|s| name.eq_ignore_ascii_case(s)) {
                    continue;
                }
                let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) else {
                    continue;
                };
                headers.append(name, value);
            }
            if !h2 {
                let host = HeaderValue::from_str(&host)
                    .map_err(|e| FetchError::Connect(format!("invalid host {host:?}: {e}")))?;
                headers.insert(HOST, host);
                headers.insert(CONNECTION, HeaderValue::from_static("close"));
            }
        }
        Ok(builder.body(Empty::new())?)
    }
}

impl std::fmt::Debug for TargetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetClient")
            .field("target", &self.target.name())
            .field("tls", &self.tls.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn connect_any(addrs: &[SocketAddr], host_port: &str) -> std::result::Result<TcpStream, FetchError> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) => e.into(),
        None => FetchError::Connect(format!("no addresses for {host_port}")),
    })
}

async fn send_http1<I>(
    io: I,
    request: http::Request<Empty<Bytes>>,
) -> std::result::Result<(http::Response<Incoming>, ConnectionGuard), FetchError>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
    let driver = tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::trace!(error = %e, "Connection closed with error");
        }
    });
    let guard = ConnectionGuard(driver.abort_handle());
    let response = sender.send_request(request).await?;
    Ok((response, guard))
}

async fn send_http2<I>(
    io: I,
    request: http::Request<Empty<Bytes>>,
) -> std::result::Result<(http::Response<Incoming>, ConnectionGuard), FetchError>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), io).await?;
    let driver = tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::trace!(error = %e, "Connection closed with error");
        }
    });
    let guard = ConnectionGuard(driver.abort_handle());
    let response = sender.send_request(request).await?;
    Ok((response, guard))
}
