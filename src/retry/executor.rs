use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::delay::DelayPolicy;
use crate::error::RetryError;

/// Attempt budget and backoff for one job run. Built once from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `0` is treated as `1`.
    pub max_attempts: u32,
    pub delay: DelayPolicy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: DelayPolicy) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Attempts that will actually be made.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl std::fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} attempt(s), {}", self.effective_attempts(), self.delay)
    }
}

/// Suspension point between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(delay))
    }
}

/// Runs a fallible operation until it succeeds or the policy's attempt
/// budget is spent.
///
/// Each call to [`execute`](RetryExecutor::execute) is independent: there is
/// no memory of earlier runs, no jitter and no circuit breaking.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    /// Invoke `operation` with attempt indices `1, 2, ...`.
    ///
    /// Returns the first success immediately. After a failure the delay for
    /// that attempt is awaited before the next one starts; the failure of the
    /// last allowed attempt is returned inside a [`RetryError`]. Whatever the
    /// operation logs or reports for an attempt happens before the delay,
    /// since the delay is only awaited once the operation's future resolved.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.policy.effective_attempts();
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(last) if attempt >= max_attempts => {
                    return Err(RetryError {
                        attempts: attempt,
                        last,
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay.delay_for_attempt(attempt);
                    debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Records requested delays instead of sleeping.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    delays: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    pub(crate) fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.delays.lock().unwrap().push(delay);
        Box::pin(std::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn executor(max_attempts: u32, delay: DelayPolicy) -> (RetryExecutor, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let exec = RetryExecutor::with_sleeper(RetryPolicy::new(max_attempts, delay), sleeper.clone());
        (exec, sleeper)
    }

    #[tokio::test]
    async fn permanent_failure_uses_whole_budget() {
        for n in 1..=6 {
            let (exec, sleeper) = executor(n, DelayPolicy::SteppedLinear { base_ms: 10 });
            let calls = Cell::new(0u32);
            let result: Result<(), _> = exec
                .execute(|_| {
                    calls.set(calls.get() + 1);
                    async { Err::<(), _>("boom") }
                })
                .await;

            let err = result.unwrap_err();
            assert_eq!(calls.get(), n);
            assert_eq!(err.attempts, n);
            assert_eq!(err.last, "boom");
            assert_eq!(sleeper.delays().len() as u32, n - 1);
        }
    }

    #[tokio::test]
    async fn succeeds_after_k_failures() {
        let (exec, sleeper) = executor(5, DelayPolicy::SteppedLinear { base_ms: 10 });
        let calls = Cell::new(0u32);
        let value = exec
            .execute(|attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt <= 2 {
                        Err("transient")
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.get(), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::ZERO, Duration::from_millis(10)]
        );
    }

    #[tokio::test]
    async fn first_success_has_no_delay() {
        let (exec, sleeper) = executor(5, DelayPolicy::Exponential { base_ms: 100 });
        let value = exec.execute(|_| async { Ok::<_, &str>("ok") }).await.unwrap();
        assert_eq!(value, "ok");
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn zero_and_one_attempts_run_once() {
        for max in [0, 1] {
            let (exec, sleeper) = executor(max, DelayPolicy::Exponential { base_ms: 100 });
            let calls = Cell::new(0u32);
            let err = exec
                .execute(|_| {
                    calls.set(calls.get() + 1);
                    async { Err::<(), _>("nope") }
                })
                .await
                .unwrap_err();
            assert_eq!(calls.get(), 1);
            assert_eq!(err.attempts, 1);
            assert!(sleeper.delays().is_empty());
        }
    }

    #[tokio::test]
    async fn stepped_linear_delays_in_order() {
        let (exec, sleeper) = executor(5, DelayPolicy::SteppedLinear { base_ms: 300 });
        let _ = exec
            .execute(|_| async { Err::<(), _>("down") })
            .await;
        assert_eq!(
            sleeper.delays(),
            vec![
                Duration::ZERO,
                Duration::from_millis(300),
                Duration::from_millis(600),
                Duration::from_millis(900),
            ]
        );
    }

    #[tokio::test]
    async fn exponential_delays_in_order() {
        let (exec, sleeper) = executor(4, DelayPolicy::Exponential { base_ms: 1000 });
        let _ = exec
            .execute(|_| async { Err::<(), _>("down") })
            .await;
        assert_eq!(
            sleeper.delays(),
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(8000),
            ]
        );
    }

    #[tokio::test]
    async fn attempt_side_effects_precede_delay() {
        // The operation and the sleeper write to the same log; every attempt
        // line must come before the delay that follows it.
        let log = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));

        struct LoggingSleeper(Arc<std::sync::Mutex<Vec<String>>>);
        impl Sleeper for LoggingSleeper {
            fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
                self.0.lock().unwrap().push(format!("delay {}", delay.as_millis()));
                Box::pin(std::future::ready(()))
            }
        }

        let exec = RetryExecutor::with_sleeper(
            RetryPolicy::new(3, DelayPolicy::SteppedLinear { base_ms: 1 }),
            Arc::new(LoggingSleeper(log.clone())),
        );
        let seen = RefCell::new(Vec::new());
        let _ = exec
            .execute(|attempt| {
                seen.borrow_mut().push(attempt);
                log.lock().unwrap().push(format!("attempt {attempt}"));
                async { Err::<(), _>("x") }
            })
            .await;

        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["attempt 1", "delay 0", "attempt 2", "delay 1", "attempt 3"]
        );
    }

    #[test]
    fn policy_display_shows_budget_and_backoff() {
        let policy = RetryPolicy::new(5, DelayPolicy::SteppedLinear { base_ms: 300 });
        assert_eq!(policy.to_string(), "5 attempt(s), stepped-linear(300ms)");
        let policy = RetryPolicy::new(0, DelayPolicy::Exponential { base_ms: 1000 });
        assert_eq!(policy.to_string(), "1 attempt(s), exponential(1000ms)");
    }

    #[test]
    fn effective_attempts_floor_is_one() {
        let policy = RetryPolicy::new(0, DelayPolicy::Exponential { base_ms: 1 });
        assert_eq!(policy.effective_attempts(), 1);
        let policy = RetryPolicy::new(4, DelayPolicy::Exponential { base_ms: 1 });
        assert_eq!(policy.effective_attempts(), 4);
    }
}
