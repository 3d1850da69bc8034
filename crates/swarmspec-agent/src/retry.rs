// ABOUTME: Bounded retry with exponential backoff, applied explicitly where a call may fail transiently.
// ABOUTME: The policy owns the attempt limit and delay schedule; callers supply the retryable-error predicate.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Minimum backoff delay between attempts.
const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(4);
/// Maximum backoff delay between attempts.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Exponential delay schedule: `min * 2^(n-1)` after the n-th failure,
/// clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: false,
        }
    }
}

impl Backoff {
    /// A window whose maximum is raised to the minimum if given inverted.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            jitter: false,
        }
    }

    /// No waiting between attempts.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay before the next attempt after `failures` consecutive failures
    /// (1-based). Jitter adds up to a quarter of the delay, never exceeding
    /// the maximum.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let base = self
            .min_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
            .max(self.min_delay);

        if !self.jitter {
            return base;
        }
        let spread = (base.as_millis() / 4) as u64;
        if spread == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=spread);
        (base + Duration::from_millis(extra)).min(self.max_delay)
    }
}

/// Details of one failed attempt, handed to the caller's observer.
#[derive(Debug)]
pub struct RetryFailure<'a, E> {
    pub attempt: u32,
    pub max_attempts: u32,
    pub error: &'a E,
    /// How long the policy will wait before the next attempt; `None` when it
    /// is giving up.
    pub next_delay: Option<Duration>,
}

/// The error that ended a retry loop.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    /// False when the loop stopped because the error was not retryable.
    pub retryable: bool,
    pub source: E,
}

/// A bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// A policy allowing `max_attempts` total attempts (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run `op` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the attempt limit is reached. `op` receives the 1-based
    /// attempt number. `on_failure` observes every failed attempt before the
    /// policy sleeps or gives up. Returns the value and the attempts used.
    ///
    /// The backoff sleep suspends only this call.
    pub async fn retry<T, E, F, Fut, P, O>(
        &self,
        mut op: F,
        is_retryable: P,
        mut on_failure: O,
    ) -> Result<(T, u32), RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        O: FnMut(&RetryFailure<'_, E>),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => error,
            };

            let retryable = is_retryable(&error);
            let next_delay = (retryable && attempt < self.max_attempts)
                .then(|| self.backoff.delay_for(attempt));

            on_failure(&RetryFailure {
                attempt,
                max_attempts: self.max_attempts,
                error: &error,
                next_delay,
            });

            match next_delay {
                Some(delay) => {
                    drop(error);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(RetryError {
                        attempts: attempt,
                        retryable,
                        source: error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky,
        Fatal,
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_backoff(Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
        ))
    }

    /// Runs an op that fails with `Flaky` for the first `k` calls.
    async fn run_flaky(policy: RetryPolicy, k: u32) -> (Result<(u32, u32), RetryError<TestError>>, u32) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = policy
            .retry(
                move |attempt| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= k { Err(TestError::Flaky) } else { Ok(attempt) }
                    }
                },
                |e: &TestError| *e == TestError::Flaky,
                |_| {},
            )
            .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[test]
    fn default_window_is_four_to_ten_seconds() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for(1), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(30), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_inside_window() {
        let backoff = Backoff::new(Duration::from_millis(400), Duration::from_millis(1000))
            .with_jitter(true);
        for failures in 1..6 {
            let delay = backoff.delay_for(failures);
            assert!(delay >= Duration::from_millis(400), "{delay:?}");
            assert!(delay <= Duration::from_millis(1000), "{delay:?}");
        }
    }

    #[test]
    fn inverted_window_is_normalized() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.max_delay(), Duration::from_secs(5));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn succeeds_after_k_transient_failures_using_k_plus_one_attempts() {
        for k in 0..3 {
            let (result, calls) = run_flaky(fast(3), k).await;
            let (attempt, used) = result.unwrap();
            assert_eq!(used, k + 1);
            assert_eq!(attempt, k + 1);
            assert_eq!(calls, k + 1);
        }
    }

    #[tokio::test]
    async fn gives_up_after_exactly_max_attempts() {
        for k in [3, 4, 10] {
            let (result, calls) = run_flaky(fast(3), k).await;
            let err = result.unwrap_err();
            assert_eq!(err.attempts, 3);
            assert!(err.retryable);
            assert_eq!(err.source, TestError::Flaky);
            assert_eq!(calls, 3);
        }
    }

    #[tokio::test]
    async fn non_retryable_error_stops_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), _> = fast(5)
            .retry(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Fatal) }
                },
                |e: &TestError| *e == TestError::Flaky,
                |_| {},
            )
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn observer_sees_every_failure_with_next_delay() {
        let mut seen = Vec::new();
        let result: Result<((), u32), _> = fast(3)
            .retry(
                |_| async { Err(TestError::Flaky) },
                |_| true,
                |f: &RetryFailure<'_, TestError>| seen.push((f.attempt, f.next_delay.is_some())),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(seen, vec![(1, true), (2, true), (3, false)]);
    }

    #[tokio::test]
    async fn concurrent_retries_do_not_block_each_other() {
        let slow = RetryPolicy::new(2).with_backoff(Backoff::new(
            Duration::from_millis(300),
            Duration::from_millis(300),
        ));
        let started = std::time::Instant::now();

        let sleeper = slow.retry(
            |attempt| async move { if attempt == 1 { Err(TestError::Flaky) } else { Ok(()) } },
            |_| true,
            |_| {},
        );
        let quick = async {
            let (value, _) = fast(1)
                .retry(|_| async { Ok::<_, TestError>(started.elapsed()) }, |_| true, |_| {})
                .await
                .unwrap();
            value
        };

        let (slept, quick_elapsed) = tokio::join!(sleeper, quick);
        assert!(slept.is_ok());
        assert!(quick_elapsed < Duration::from_millis(300));
    }
}
