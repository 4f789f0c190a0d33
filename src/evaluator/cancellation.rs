//! Cooperative cancellation shared by an evaluation and its external requests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::core::{FhirPathError, Result};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable handle; cancelling any clone cancels all of them
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FhirPathError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Completes when the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a cancel between the two is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Run `future` unless `token` fires first
pub async fn run_cancellable<T, F>(token: Option<&CancellationToken>, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match token {
        None => future.await,
        Some(token) => {
            token.check()?;
            tokio::select! {
                result = future => result,
                _ = token.cancelled() => Err(FhirPathError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_interrupts_pending_work() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result: Result<()> = run_cancellable(Some(&token), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().is_cancellation());
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_before_work() {
        let token = CancellationToken::new();
        token.cancel();
        let result = run_cancellable(Some(&token), async { Ok(1) }).await;
        assert!(matches!(result, Err(FhirPathError::Cancelled)));
    }
}
