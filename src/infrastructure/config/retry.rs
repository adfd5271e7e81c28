//! Retry configuration for cloud API calls.

use serde::Deserialize;

/// Budgets for retrying transient cloud failures.
///
/// Lookups and tagging use the short budget; instance creation, which races
/// IAM and security-group propagation, uses the long one.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay between attempts (milliseconds).
    #[serde(default = "default_retry_after_ms")]
    pub retry_after_ms: u64,
    /// Short retry budget (seconds).
    #[serde(default = "default_retry_for_secs")]
    pub retry_for_secs: u64,
    /// Long retry budget for instance creation (seconds).
    #[serde(default = "default_long_retry_for_secs")]
    pub long_retry_for_secs: u64,
    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Ceiling for the delay between attempts (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_retry_after_ms() -> u64 {
    5_000
}

const fn default_retry_for_secs() -> u64 {
    50
}

const fn default_long_retry_for_secs() -> u64 {
    3_600
}

const fn default_backoff_multiplier() -> f64 {
    1.0
}

const fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_after_ms: default_retry_after_ms(),
            retry_for_secs: default_retry_for_secs(),
            long_retry_for_secs: default_long_retry_for_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
