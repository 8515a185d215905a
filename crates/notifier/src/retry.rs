//! Bounded retry for a single send.

use std::future::Future;
use std::time::Duration;

use crate::channels::SendError;

/// How many times to try a send and how long to wait between tries.
///
/// The wait grows linearly: `backoff`, `2 * backoff`, ...
/// Only retryable errors (`SendError::is_retryable`) are tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl SendPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Exactly one attempt.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub async fn run<F, Fut>(&self, mut attempt: F) -> Result<(), SendError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), SendError>>,
    {
        let mut n = 1;
        loop {
            match attempt(n).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && n < self.max_attempts => {
                    let wait = self.backoff * n;
                    tracing::warn!(
                        attempt = n,
                        max_attempts = self.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    n += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self::once()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = SendPolicy::new(3, Duration::from_millis(100));

        let result = policy
            .run(|n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(SendError::Transport("timeout".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = SendPolicy::new(2, Duration::from_millis(10));

        let result = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SendError::Transport("down".into())) }
            })
            .await;

        assert!(matches!(result, Err(SendError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = SendPolicy::new(5, Duration::from_millis(10));

        let result = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SendError::Rejected("invalid number".into())) }
            })
            .await;

        assert!(matches!(result, Err(SendError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(SendPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
