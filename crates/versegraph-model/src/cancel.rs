//! Cooperative cancellation.

use crate::error::{GraphError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared cancellation signal.
///
/// Clones observe the same signal. Once cancelled a token stays cancelled; the
/// orchestrator issues a fresh token for every operation.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    signal: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
        }
    }

    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.signal.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Loop-boundary check.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(GraphError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Race `fut` against the token; cancellation drops `fut` and yields `Aborted`.
    pub async fn run_until_cancelled<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(GraphError::Aborted),
            result = fut => result,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn clones_share_the_signal() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(observer.check().is_ok());

        token.cancel();
        assert!(observer.is_cancelled());
        assert!(matches!(observer.check(), Err(GraphError::Aborted)));
        observer.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_cancelled_aborts_pending_work() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: Result<()> = token
            .run_until_cancelled(std::future::pending::<Result<()>>())
            .await;
        assert!(matches!(result, Err(GraphError::Aborted)));
    }

    #[tokio::test]
    async fn run_until_cancelled_passes_through_results() {
        let token = CancellationToken::new();
        let value = token.run_until_cancelled(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
