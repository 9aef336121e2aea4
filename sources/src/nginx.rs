//! Replay of requests captured in an nginx access log

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use dealgood_core::metrics::SourceMetrics;
use dealgood_core::{Request, RequestFilter, SourceError};

use crate::random::RandomSource;

/// Source name reported for log replays
pub const NGINX_SOURCE: &str = "nginx-log";

/// Extract a gateway request from one access-log line.
///
/// Only the first quoted field is looked at (`"GET /ipfs/... HTTP/1.1"`). Lines
/// that are not GET requests for `/ipfs` or `/ipns` paths yield `None`.
pub fn parse_nginx_line(line: &str) -> Option<Request> {
    let start = line.find('"')? + 1;
    let len = line[start..].find('"')?;
    let mut fields = line[start..start + len].splitn(3, ' ');

    let method = fields.next()?;
    let uri = fields.next()?;
    fields.next()?;

    if method != "GET" || !(uri.starts_with("/ipfs") || uri.starts_with("/ipns")) {
        return None;
    }
    Some(Request::get(uri))
}

/// Load every gateway request from the log at `path`
pub async fn read_nginx_log(path: &Path) -> Result<Vec<Request>, SourceError> {
    let file = File::open(path)
        .await
        .map_err(|e| SourceError::start(NGINX_SOURCE, format!("open {}: {e}", path.display())))?;

    let mut requests = Vec::new();
    let mut lines = BufReader::new(file).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| SourceError::start(NGINX_SOURCE, format!("read {}: {e}", path.display())))?
    {
        if let Some(req) = parse_nginx_line(&line) {
            requests.push(req);
        }
    }
    Ok(requests)
}

/// Build a random replay source over the requests found in an access log
pub async fn from_nginx_log(
    path: &Path,
    capacity: usize,
    filter: RequestFilter,
    metrics: SourceMetrics,
) -> Result<RandomSource, SourceError> {
    let requests = read_nginx_log(path).await?;
    if requests.is_empty() {
        return Err(SourceError::start(
            NGINX_SOURCE,
            format!("no GET /ipfs or /ipns requests in {}", path.display()),
        ));
    }
    tracing::info!(path = %path.display(), requests = requests.len(), "Loaded access log");
    Ok(RandomSource::named(NGINX_SOURCE, requests, capacity, filter, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealgood_core::{Metrics, RequestSource};
    use std::io::Write;

    const LOG: &str = r#"10.0.0.1 - - [01/Mar/2024:12:00:00 +0000] "GET /ipfs/bafkreifjjcie6lypi6ny7amxnfftagclbuxndqonfipmb64f2km2devei4 HTTP/1.1" 200 512 "-" "curl/8.0"
10.0.0.2 - - [01/Mar/2024:12:00:01 +0000] "POST /ipfs/QmUa7f9JtJMsqJJ3s3ZXk6WyF4xJLE8FiqYskZGgk8GCDv HTTP/1.1" 405 0 "-" "curl/8.0"
10.0.0.3 - - [01/Mar/2024:12:00:02 +0000] "GET /favicon.ico HTTP/1.1" 404 0 "-" "Mozilla/5.0"
10.0.0.4 - - [01/Mar/2024:12:00:03 +0000] "GET /ipns/en.wikipedia-on-ipfs.org/wiki/ HTTP/2.0" 200 9000 "-" "Mozilla/5.0"
garbage without quotes
"#;

    #[test]
    fn test_parse_line() {
        let req = parse_nginx_line(LOG.lines().next().unwrap()).unwrap();
        assert_eq!(req.method, "GET");
        assert!(req.uri.starts_with("/ipfs/bafk"));
        assert!(req.timestamp.is_none());
    }

    #[test]
    fn test_parse_rejects() {
        assert!(parse_nginx_line("no quotes at all").is_none());
        assert!(parse_nginx_line(r#"x "GET /ipfs/a""#).is_none());
        assert!(parse_nginx_line(r#"x "unterminated"#).is_none());
        assert!(parse_nginx_line(r#"x "HEAD /ipfs/a HTTP/1.1""#).is_none());
    }

    #[tokio::test]
    async fn test_read_log_keeps_gateway_gets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();

        let reqs = read_nginx_log(file.path()).await.unwrap();
        let uris: Vec<_> = reqs.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(uris.len(), 2);
        assert!(uris[1].starts_with("/ipns/"));
    }

    #[tokio::test]
    async fn test_source_from_log() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();
        let metrics = Metrics::new().unwrap();

        let mut src = from_nginx_log(file.path(), 1, RequestFilter::None, metrics.source("exp", NGINX_SOURCE))
            .await
            .unwrap();
        assert_eq!(src.name(), NGINX_SOURCE);
        assert_eq!(src.len(), 2);

        src.start().await.unwrap();
        let mut stream = src.stream().unwrap();
        let req = stream.recv().await.unwrap();
        assert!(req.timestamp.is_some());
        src.stop();
    }

    #[tokio::test]
    async fn test_empty_log_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"garbage\n").unwrap();
        let metrics = Metrics::new().unwrap();

        let err = from_nginx_log(file.path(), 1, RequestFilter::None, metrics.source("exp", NGINX_SOURCE))
            .await
            .err().unwrap();
        assert!(matches!(err, SourceError::Start { .. }));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = read_nginx_log(Path::new("/nonexistent/access.log"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("open"));
    }
}
