//! Readiness probing of targets before a run

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::request::Request;
use crate::target::Target;
use crate::worker::TargetClient;

/// Waits until every target answers `GET /`
#[derive(Debug, Clone)]
pub struct Probe {
    timeout: Duration,
    request_timeout: Duration,
    retry_interval: Duration,
}

impl Probe {
    /// Probe for at most `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            request_timeout: Duration::from_secs(2),
            retry_interval: Duration::from_secs(5),
        }
    }

    /// Timeout of each probe request
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Pause between two probe rounds
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Probe all targets in rounds until every one of them responds.
    ///
    /// Any HTTP response counts as ready. Each round also re-resolves the
    /// target addresses.
    pub async fn wait_ready(&self, targets: &[Arc<Target>], cancel: &CancellationToken) -> Result<()> {
        tracing::info!(targets = targets.len(), "Waiting for targets to be ready");
        let start = Instant::now();

        loop {
            let round = join_all(targets.iter().map(|t| self.probe(Arc::clone(t))));
            let last_err = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                results = round => results.into_iter().find_map(|r| r.err()),
            };

            let Some(message) = last_err else {
                tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "All targets ready");
                return Ok(());
            };

            if start.elapsed() + self.retry_interval > self.timeout {
                return Err(Error::NotReady {
                    timeout: self.timeout,
                    message,
                });
            }
            tracing::info!(error = %message, "Ready check failed");

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    async fn probe(&self, target: Arc<Target>) -> std::result::Result<(), String> {
        if let Err(e) = target.resolve().await {
            return Err(format!("{}: resolve: {e}", target.name()));
        }
        let name = target.name().to_string();
        let client = TargetClient::new(target, self.request_timeout).map_err(|e| format!("{name}: {e}"))?;
        match client.try_execute(&Request::get("/")).await {
            Ok(_) => Ok(()),
            Err(e) => Err(format!("{name}: {e}")),
        }
    }
}

/// Wait up to `timeout` for every target to respond, using the default probe settings
pub async fn wait_ready(
    targets: &[Arc<Target>],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    Probe::new(timeout).wait_ready(targets, cancel).await
}
