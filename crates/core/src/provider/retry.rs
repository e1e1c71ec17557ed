//! Retry policy shared by every provider call: up to `max_retries`
//! attempts with exponential backoff `base × 2^(n-1)` seconds between
//! attempts, sleeping only between retries (never after the final one).

use std::time::Duration;

/// Whether a failed attempt should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryable {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before attempt `n` (1-indexed): `base * 2^(n-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `op`, retrying up to `max_retries` times while `classify`
    /// reports [`Retryable::Yes`], sleeping `delay_for_attempt` between
    /// attempts via `sleep`. Returns the last error if every attempt
    /// fails.
    pub async fn run<T, E, Op, Fut, Sleep, SleepFut, Classify>(
        &self,
        mut op: Op,
        classify: Classify,
        sleep: Sleep,
    ) -> Result<T, E>
    where
        Op: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        Classify: Fn(&E) -> Retryable,
        Sleep: Fn(Duration) -> SleepFut,
        SleepFut: std::future::Future<Output = ()>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let retryable = classify(&err) == Retryable::Yes;
                    if !retryable || attempt > self.max_retries {
                        return Err(err);
                    }
                    sleep(self.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_each_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: Result<&str, &str> = policy
            .run(
                |_attempt| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("transient")
                        } else {
                            Ok("ok")
                        }
                    }
                },
                |_| Retryable::Yes,
                |d| tokio::time::sleep(d),
            )
            .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = policy
            .run(
                |_attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("bad request") }
                },
                |_| Retryable::No,
                |d| tokio::time::sleep(d),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = policy
            .run(
                |_attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("still failing") }
                },
                |_| Retryable::Yes,
                |d| tokio::time::sleep(d),
            )
            .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
