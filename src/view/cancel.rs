use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{ConsoleError, Result};

/// Lifetime of a view's requests.
///
/// Every request a view issues goes through `run`, which races it against
/// the scope's cancellation and a timeout. Cancelling is permanent.
#[derive(Clone, Debug)]
pub struct CancelScope {
    cancel_tx: Arc<watch::Sender<bool>>,
    timeout: Duration,
}

impl CancelScope {
    pub fn new(timeout: Duration) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            cancel_tx: Arc::new(cancel_tx),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Drive `request` to completion unless the scope is cancelled or the
    /// timeout elapses first.
    pub async fn run<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(ConsoleError::Cancelled);
        }

        let mut cancel_rx = self.cancel_tx.subscribe();
        let cancelled = async move {
            loop {
                if *cancel_rx.borrow_and_update() {
                    return;
                }
                if cancel_rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(ConsoleError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, request) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    log::warn!("request exceeded {:?}", self.timeout);
                    Err(ConsoleError::Timeout)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_results_through() {
        let scope = CancelScope::new(Duration::from_secs(1));
        let value = scope.run(async { Ok::<_, ConsoleError>(7) }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let scope = CancelScope::new(Duration::from_secs(2));
        let result = scope
            .run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ConsoleError>(())
            })
            .await;
        assert_eq!(result, Err(ConsoleError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_in_flight_request() {
        let scope = CancelScope::new(Duration::from_secs(600));
        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = scope
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, ConsoleError>(())
            })
            .await;
        assert_eq!(result, Err(ConsoleError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_scope_rejects_new_requests() {
        let scope = CancelScope::new(Duration::from_secs(1));
        scope.cancel();
        assert!(scope.is_cancelled());
        let result = scope.run(async { Ok::<_, ConsoleError>(1) }).await;
        assert_eq!(result, Err(ConsoleError::Cancelled));
    }
}
