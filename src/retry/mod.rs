//! Retry and backoff used by the stream client and the stores
//!
//! The shard processor itself never retries; redelivery of a batch is the
//! coordinator's business. Retries live at the I/O edges only.

mod backoff;

pub use backoff::{Backoff, ExponentialBackoff, ExponentialBackoffBuilder};

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (None for unlimited)
    pub max_retries: Option<u32>,
    /// Delay after the first failure
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::builder()
            .initial_delay(self.initial_backoff)
            .max_delay(self.max_backoff)
            .jitter_factor(self.jitter_factor)
            .build()
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("Maximum retries ({attempts}) exceeded: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: E },

    #[error("Non-retryable failure: {0}")]
    Permanent(E),

    #[error("Retry interrupted by shutdown signal")]
    Interrupted,
}

impl<E> RetryError<E> {
    /// The underlying operation error, if the retry did not stop on shutdown
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::MaxRetriesExceeded { last_error, .. } => Some(last_error),
            RetryError::Permanent(e) => Some(e),
            RetryError::Interrupted => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RetryError::Interrupted)
    }
}

/// Runs an operation until it succeeds, fails permanently, runs out of
/// attempts, or the shutdown signal fires.
pub struct RetryHandle<B: Backoff = ExponentialBackoff> {
    config: RetryConfig,
    backoff: B,
    shutdown: Option<watch::Receiver<bool>>,
    attempts: u32,
}

impl RetryHandle<ExponentialBackoff> {
    pub fn new(config: RetryConfig) -> Self {
        let backoff = config.backoff();
        Self::with_backoff(config, backoff)
    }
}

impl<B: Backoff> RetryHandle<B> {
    pub fn with_backoff(config: RetryConfig, backoff: B) -> Self {
        Self {
            config,
            backoff,
            shutdown: None,
            attempts: 0,
        }
    }

    /// Abort waiting (between or during attempts) once `shutdown` flips to true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub async fn retry<F, Fut, T, E>(&mut self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry_if(operation, |_| true).await
    }

    /// Like [`retry`](Self::retry), but errors for which `is_retryable`
    /// returns false are surfaced immediately as [`RetryError::Permanent`].
    pub async fn retry_if<F, Fut, T, E, P>(
        &mut self,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut shutdown = self.shutdown.clone();

        loop {
            self.attempts += 1;
            trace!(attempt = self.attempts, "Executing operation");

            let outcome = tokio::select! {
                result = operation() => Some(result),
                _ = shutdown_signalled(&mut shutdown) => None,
            };

            let error = match outcome {
                Some(Ok(value)) => {
                    debug!(attempts = self.attempts, "Operation succeeded");
                    return Ok(value);
                }
                Some(Err(e)) => e,
                None => {
                    debug!("Operation interrupted by shutdown signal");
                    return Err(RetryError::Interrupted);
                }
            };

            if !is_retryable(&error) {
                return Err(RetryError::Permanent(error));
            }

            if let Some(max) = self.config.max_retries {
                if self.attempts >= max {
                    warn!(
                        attempts = self.attempts,
                        error = %error,
                        "Maximum retry attempts exceeded"
                    );
                    return Err(RetryError::MaxRetriesExceeded {
                        attempts: self.attempts,
                        last_error: error,
                    });
                }
            }

            let delay = self.backoff.next_delay(self.attempts);
            warn!(
                attempt = self.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying after delay"
            );

            let interrupted = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = shutdown_signalled(&mut shutdown) => true,
            };
            if interrupted {
                debug!("Retry interrupted by shutdown signal");
                return Err(RetryError::Interrupted);
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Resolves once shutdown is signalled; never resolves without a receiver or
/// after the sender is gone.
async fn shutdown_signalled(shutdown: &mut Option<watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => wait_for_shutdown(rx).await,
        None => std::future::pending::<()>().await,
    }
}

/// Resolves once `shutdown` reads true; a dropped sender never signals.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: Option<u32>) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() -> anyhow::Result<()> {
        let mut retry = RetryHandle::new(fast_config(Some(5)));
        let counter = Arc::new(AtomicU32::new(0));

        let result = retry
            .retry(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet")
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.ok(), Some("success"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(retry.attempts(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_max_attempts() {
        let mut retry = RetryHandle::new(fast_config(Some(2)));

        let result: Result<(), _> = retry.retry(|| async { Err("always fails") }).await;

        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let mut retry = RetryHandle::new(fast_config(Some(5)));

        let result: Result<(), _> = retry
            .retry_if(|| async { Err("fatal") }, |e: &&str| *e != "fatal")
            .await;

        assert!(matches!(result, Err(RetryError::Permanent("fatal"))));
        assert_eq!(retry.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_interrupted_by_shutdown() -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut retry = RetryHandle::new(RetryConfig {
            max_retries: None,
            ..Default::default()
        })
        .with_shutdown(shutdown_rx);

        let handle = tokio::spawn(async move {
            retry
                .retry(|| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err::<(), _>("never succeeds")
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true)?;

        let result = handle.await?;
        assert!(result.is_err_and(|e| e.is_interrupted()));
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_interrupt() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        let mut retry = RetryHandle::new(fast_config(Some(3))).with_shutdown(shutdown_rx);
        let result = retry.retry(|| async { Ok::<_, String>(7) }).await;

        assert_eq!(result.ok(), Some(7));
    }
}
