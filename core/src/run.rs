//! Supervision of long-running tasks
//!
//! A [`RunGroup`] starts every registered task with a shared cancellation
//! token, cancels that token on SIGINT/SIGTERM or when any task fails, and
//! waits for all tasks to return. A task may cancel the token it was given to
//! stop the rest of the group.

use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type TaskFn = Box<dyn FnOnce(CancellationToken) -> TaskFuture + Send>;

/// A set of tasks that run until cancelled
pub struct RunGroup {
    tasks: Vec<(String, TaskFn)>,
    handle_signals: bool,
}

impl RunGroup {
    /// Create an empty group that listens for OS signals
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            handle_signals: true,
        }
    }

    /// Do not install the SIGINT/SIGTERM handler
    pub fn without_signals(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Register a task
    pub fn add<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks
            .push((name.into(), Box::new(move |cancel| Box::pin(task(cancel)))));
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Start every task and wait for all of them.
    ///
    /// Returns the first error that is not a cancellation.
    pub async fn run_and_wait(self, cancel: CancellationToken) -> Result<()> {
        let token = cancel.child_token();
        let mut set = JoinSet::new();

        for (name, task) in self.tasks {
            let fut = task(token.clone());
            set.spawn(async move { (name, fut.await) });
        }

        if self.handle_signals {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = shutdown_signal() => {
                        tracing::info!("Received shutdown signal, stopping");
                        token.cancel();
                    }
                }
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok((name, Ok(()))) => {
                    tracing::debug!(task = %name, "Task finished");
                    None
                }
                Ok((name, Err(e))) if e.is_cancelled() => {
                    tracing::debug!(task = %name, "Task cancelled");
                    None
                }
                Ok((name, Err(e))) => {
                    tracing::error!(task = %name, error = %e, "Task failed");
                    Some(e)
                }
                Err(e) if e.is_cancelled() => None,
                Err(e) => Some(Error::worker(format!("task panicked: {e}"))),
            };
            if let Some(e) = failure {
                token.cancel();
                first_error.get_or_insert(e);
            }
        }

        // Releases the signal listener.
        token.cancel();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for RunGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGroup")
            .field("tasks", &self.tasks.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("handle_signals", &self.handle_signals)
            .finish()
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "Unable to listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_group() {
        let group = RunGroup::new().without_signals();
        assert!(group.is_empty());
        group.run_and_wait(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_all_tasks_succeed() {
        let mut group = RunGroup::new().without_signals();
        group.add("one", |_| async { Ok(()) });
        group.add("two", |_| async { Ok(()) });
        assert_eq!(group.len(), 2);
        group.run_and_wait(CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_error_cancels_others() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);

        let mut group = RunGroup::new().without_signals();
        group.add("server", move |cancel| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
            Err(Error::Cancelled)
        });
        group.add("broken", |_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(Error::worker("boom"))
        });

        let err = group.run_and_wait(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_task_can_stop_group() {
        let mut group = RunGroup::new().without_signals();
        group.add("server", |cancel| async move {
            cancel.cancelled().await;
            Ok(())
        });
        group.add("job", |cancel| async move {
            cancel.cancel();
            Ok(())
        });
        tokio::time::timeout(Duration::from_secs(1), group.run_and_wait(CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_outer_cancellation_is_clean() {
        let mut group = RunGroup::new().without_signals();
        group.add("server", |cancel| async move {
            cancel.cancelled().await;
            Err(Error::Cancelled)
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        group.run_and_wait(cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_panic_reported() {
        let mut group = RunGroup::new().without_signals();
        group.add("panics", |_| async {
            let values: Vec<u32> = Vec::new();
            let _ = values[0];
            Ok(())
        });
        let err = group.run_and_wait(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }
}
