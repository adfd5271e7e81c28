//! Deadline-bounded retry of cloud API calls.
//!
//! An operation is retried while its failure is classified as transient and
//! the next attempt would still start before the deadline. The final error is
//! returned unchanged.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::info;

use crate::error::CloudError;
use crate::infrastructure::config::retry::RetryConfig;

/// Codes and message fragments of failures caused by IAM or security-group
/// propagation lagging behind instance creation.
const CREATION_RACE_CODES: &[&str] = &["InvalidGroup.NotFound"];
const CREATION_RACE_MESSAGES: &[&str] = &["invalid iam instance profile", "no associated iam roles"];

/// Invoke `op` until it succeeds, fails permanently or the deadline passes.
///
/// A failure is retried only if `is_transient` holds for it **and**
/// `now + delay` is still before `deadline`. A deadline of "now" therefore
/// means exactly one attempt.
///
/// # Errors
///
/// Returns the last error produced by `op`.
pub async fn retry<T, E, F, Fut, P>(
    deadline: Instant,
    delay: Duration,
    is_transient: P,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    retry_with_backoff(deadline, delay, 1.0, delay, is_transient, op).await
}

/// Like [`retry`], multiplying the delay by `multiplier` after every failed
/// attempt up to `max_delay`.
///
/// # Errors
///
/// Returns the last error produced by `op`.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    deadline: Instant,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    is_transient: P,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    retry_until(
        Some(deadline),
        initial_delay,
        multiplier,
        max_delay,
        is_transient,
        op,
    )
    .await
}

/// `None` means the budget does not fit in an [`Instant`] and never runs out.
async fn retry_until<T, E, F, Fut, P>(
    deadline: Option<Instant>,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut delay = initial_delay;
    let mut attempt: u32 = 1;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !is_transient(&err) || past_deadline(deadline, delay) {
            return Err(err);
        }
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after transient failure"
        );
        sleep(delay).await;
        attempt += 1;
        delay = next_delay(delay, multiplier, max_delay);
    }
}

/// Whether an attempt started after `delay` would land at or past `deadline`.
/// A delay that overflows the clock is past any deadline.
fn past_deadline(deadline: Option<Instant>, delay: Duration) -> bool {
    let Some(deadline) = deadline else {
        return false;
    };
    Instant::now()
        .checked_add(delay)
        .map_or(true, |next| next >= deadline)
}

fn next_delay(delay: Duration, multiplier: f64, max_delay: Duration) -> Duration {
    if multiplier <= 1.0 {
        return delay;
    }
    delay.mul_f64(multiplier).min(max_delay.max(delay))
}

/// A retry budget relative to the moment each call starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total time after the first attempt during which retries may start.
    pub retry_for: Duration,
    /// Delay before the second attempt.
    pub retry_after: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(retry_for: Duration, retry_after: Duration) -> Self {
        Self {
            retry_for,
            retry_after,
            multiplier: 1.0,
            max_delay: retry_after,
        }
    }

    /// A policy making exactly one attempt.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// The short budget used for lookups and tagging.
    #[must_use]
    pub fn short(config: &RetryConfig) -> Self {
        Self::from_config(config, Duration::from_secs(config.retry_for_secs))
    }

    /// The long budget used for instance creation.
    #[must_use]
    pub fn long(config: &RetryConfig) -> Self {
        Self::from_config(config, Duration::from_secs(config.long_retry_for_secs))
    }

    fn from_config(config: &RetryConfig, retry_for: Duration) -> Self {
        Self {
            retry_for,
            retry_after: Duration::from_millis(config.retry_after_ms),
            multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Run `op` under this policy, retrying failures matching `is_transient`.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `op`.
    pub async fn run<T, E, F, Fut, P>(&self, is_transient: P, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let deadline = Instant::now().checked_add(self.retry_for);
        retry_until(
            deadline,
            self.retry_after,
            self.multiplier,
            self.max_delay,
            is_transient,
            op,
        )
        .await
    }
}

/// Retry only what the provider itself calls transient.
#[must_use]
pub fn is_transient(err: &CloudError) -> bool {
    err.is_transient()
}

/// Also retry "not found" while a freshly created resource propagates.
#[must_use]
pub fn not_found_yet(err: &CloudError) -> bool {
    err.is_transient() || err.is_not_found()
}

/// Also retry failures caused by IAM or security-group propagation racing a
/// launch.
#[must_use]
pub fn creation_race(err: &CloudError) -> bool {
    if err.is_transient() || CREATION_RACE_CODES.contains(&err.code()) {
        return true;
    }
    let message = err.message().to_lowercase();
    CREATION_RACE_MESSAGES
        .iter()
        .any(|fragment| message.contains(fragment))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn throttled() -> CloudError {
        CloudError::transient("RequestLimitExceeded", "slow down")
    }

    #[tokio::test]
    async fn zero_budget_makes_one_attempt() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), CloudError> = retry(Instant::now(), Duration::ZERO, |_| true, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(throttled()) }
        })
        .await;

        assert_eq!(result, Err(throttled()));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(60);
        let result: Result<(), CloudError> =
            retry(deadline, Duration::from_millis(1), is_transient, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(CloudError::permanent("UnauthorizedOperation", "denied")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_exits_immediately() {
        let attempts = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(60);
        let result: Result<u32, CloudError> = retry(deadline, Duration::ZERO, |_| true, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok(7) }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let attempts = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(10);
        let result = retry(deadline, Duration::from_millis(1), is_transient, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(throttled())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn gives_up_when_next_attempt_would_pass_deadline() {
        let attempts = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_millis(100);
        let result: Result<(), CloudError> =
            retry(deadline, Duration::from_millis(60), is_transient, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(throttled()) }
            })
            .await;

        assert_eq!(result, Err(throttled()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn delay_beyond_the_clock_gives_up() {
        let attempts = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(1);
        let result: Result<(), CloudError> = retry(deadline, Duration::MAX, |_| true, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(throttled()) }
        })
        .await;

        assert_eq!(result, Err(throttled()));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unbounded_budget_keeps_retrying() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(Duration::from_secs(u64::MAX), Duration::from_millis(1));
        let result = policy
            .run(is_transient, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(throttled())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_grows_to_ceiling() {
        let max = Duration::from_millis(250);
        let d = next_delay(Duration::from_millis(100), 2.0, max);
        assert_eq!(d, Duration::from_millis(200));
        assert_eq!(next_delay(d, 2.0, max), max);
        assert_eq!(
            next_delay(Duration::from_millis(100), 1.0, max),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn policies_follow_config() {
        let config = RetryConfig::default();
        assert_eq!(RetryPolicy::short(&config).retry_for, Duration::from_secs(50));
        assert_eq!(RetryPolicy::long(&config).retry_for, Duration::from_secs(3_600));
        assert_eq!(RetryPolicy::short(&config).retry_after, Duration::from_secs(5));
    }

    #[test]
    fn predicates_classify_cloud_errors() {
        let missing = CloudError::permanent("InvalidInstanceID.NotFound", "no such instance");
        assert!(!is_transient(&missing));
        assert!(not_found_yet(&missing));
        assert!(not_found_yet(&throttled()));

        assert!(creation_race(&CloudError::permanent("InvalidGroup.NotFound", "")));
        assert!(creation_race(&CloudError::permanent(
            "InvalidParameterValue",
            "Value (x) for parameter iamInstanceProfile.name is invalid. Invalid IAM Instance Profile name"
        )));
        assert!(creation_race(&CloudError::permanent(
            "InvalidParameterValue",
            "Instance Profile has no associated IAM Roles"
        )));
        assert!(!creation_race(&missing));
    }
}
