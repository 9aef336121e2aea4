//! Newline-delimited JSON requests read from stdin or any async reader

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::mpsc;

use dealgood_core::metrics::SourceMetrics;
use dealgood_core::{source_channel, Request, RequestFilter, RequestSource, SourceError};
use dealgood_core::{SourceHandle, SourceSink};

/// Reads one JSON request per line until end of input
///
/// Malformed lines are counted and skipped. End of input closes the stream.
pub struct ReaderSource<R> {
    handle: SourceHandle,
    sink: Option<SourceSink>,
    reader: Option<R>,
}

/// The standard-input source
pub type StdinSource = ReaderSource<BufReader<Stdin>>;

impl ReaderSource<BufReader<Stdin>> {
    /// Read requests from the process's standard input into a stream of `capacity`
    pub fn stdin(capacity: usize, filter: RequestFilter, metrics: SourceMetrics) -> Self {
        Self::new("stdin", BufReader::new(tokio::io::stdin()), capacity, filter, metrics)
    }
}

impl<R> ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Read requests from `reader`
    pub fn new(
        name: &str,
        reader: R,
        capacity: usize,
        filter: RequestFilter,
        metrics: SourceMetrics,
    ) -> Self {
        let (handle, sink) = source_channel(name, capacity, filter, metrics);
        Self {
            handle,
            sink: Some(sink),
            reader: Some(reader),
        }
    }
}

#[async_trait]
impl<R> RequestSource for ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.handle.name()
    }

    async fn start(&mut self) -> Result<(), SourceError> {
        let (Some(sink), Some(reader)) = (self.sink.take(), self.reader.take()) else {
            return Err(SourceError::start(self.handle.name(), "already started"));
        };
        tokio::spawn(read_lines(reader, sink));
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

async fn read_lines<R>(reader: R, sink: SourceSink)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    sink.set_connected(true);
    let mut lines = reader.lines();
    loop {
        let next = tokio::select! {
            biased;
            _ = sink.stop_token().cancelled() => break,
            next = lines.next_line() => next,
        };
        match next {
            Ok(Some(line)) => {
                let Some(req) = sink.decode(&line) else {
                    continue;
                };
                if !sink.send(req).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let err = SourceError::read(sink.name(), e);
                sink.fail(err);
                return;
            }
        }
    }
    sink.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealgood_core::Metrics;

    fn source(input: &'static str, filter: RequestFilter, metrics: &Metrics) -> ReaderSource<&'static [u8]> {
        ReaderSource::new("test", input.as_bytes(), 4, filter, metrics.source("exp", "test"))
    }

    async fn drain(src: &mut impl RequestSource) -> Vec<Request> {
        src.start().await.unwrap();
        let mut stream = src.stream().unwrap();
        let mut out = Vec::new();
        while let Some(req) = stream.recv().await {
            out.push(req);
        }
        out
    }

    #[tokio::test]
    async fn test_reads_until_eof() {
        let metrics = Metrics::new().unwrap();
        let input = concat!(
            r#"{"method":"GET","uri":"/ipfs/a","header":{"Accept":"*/*"}}"#,
            "\n",
            r#"{"uri":"/ipns/b","ts":"2024-01-02T03:04:05Z"}"#,
            "\n",
        );
        let mut src = source(input, RequestFilter::None, &metrics);
        let reqs = drain(&mut src).await;

        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].uri, "/ipfs/a");
        assert_eq!(reqs[1].method, "GET");
        assert!(reqs[1].timestamp.is_some());
        assert!(src.error().is_none());
        assert_eq!(metrics.source("exp", "test").incoming.get(), 2);
    }

    #[tokio::test]
    async fn test_malformed_lines_skipped() {
        let metrics = Metrics::new().unwrap();
        let input = "not json\n{\"uri\":\"relative\"}\n\n{\"uri\":\"/ok\"}\n";
        let mut src = source(input, RequestFilter::None, &metrics);
        let reqs = drain(&mut src).await;

        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].uri, "/ok");
        assert_eq!(metrics.source("exp", "test").errors.get(), 2);
    }

    #[tokio::test]
    async fn test_filter_applied() {
        let metrics = Metrics::new().unwrap();
        let input = "{\"uri\":\"/ipfs/x\"}\n{\"uri\":\"/about\"}\n{\"method\":\"HEAD\",\"uri\":\"/ipfs/y\"}\n";
        let mut src = source(input, RequestFilter::PathOnly, &metrics);
        let reqs = drain(&mut src).await;

        assert_eq!(reqs.len(), 1);
        let sm = metrics.source("exp", "test");
        assert_eq!(sm.incoming.get(), 3);
        assert_eq!(sm.filtered.get(), 2);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let metrics = Metrics::new().unwrap();
        let mut src = source("", RequestFilter::None, &metrics);
        src.start().await.unwrap();
        assert!(src.start().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_closes_stream() {
        let metrics = Metrics::new().unwrap();
        let (client, server) = tokio::io::duplex(64);
        let mut src = ReaderSource::new(
            "pipe",
            BufReader::new(server),
            1,
            RequestFilter::None,
            metrics.source("exp", "pipe"),
        );
        src.start().await.unwrap();
        let mut stream = src.stream().unwrap();

        src.stop();
        let closed = tokio::time::timeout(std::time::Duration::from_secs(1), stream.recv())
            .await
            .unwrap();
        assert!(closed.is_none());
        drop(client);
    }
}
