//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests, so no test
//! waits on production-sized delays.

use crate::infrastructure::config::{
    ClusterConfig, Config, LoggingConfig, PoolConfig, ReadinessConfig, RetryConfig,
};

/// Retry config with a 1ms delay and a one-second budget.
pub fn retry() -> RetryConfig {
    RetryConfig {
        retry_after_ms: 1,
        retry_for_secs: 1,
        long_retry_for_secs: 1,
        backoff_multiplier: 1.0,
        max_delay_ms: 1,
    }
}

/// Retry config making exactly one attempt.
pub fn no_retry() -> RetryConfig {
    RetryConfig {
        retry_after_ms: 0,
        retry_for_secs: 0,
        long_retry_for_secs: 0,
        backoff_multiplier: 1.0,
        max_delay_ms: 0,
    }
}

/// Pool config pretending the machine has `parallelism` CPUs.
pub fn pool(parallelism: usize) -> PoolConfig {
    PoolConfig {
        max_pool_size: 100,
        parallelism: Some(parallelism),
        parallelism_factor: 10,
    }
}

/// Readiness polling every 2ms, giving up after `timeout_ms`.
pub fn readiness(timeout_ms: u64) -> ReadinessConfig {
    ReadinessConfig {
        poll_interval_ms: 2,
        timeout_ms,
    }
}

/// Complete fast configuration under the `/test/` namespace.
pub fn config() -> Config {
    Config {
        logging: LoggingConfig::default(),
        retry: retry(),
        pool: pool(4),
        readiness: readiness(200),
        cluster: ClusterConfig {
            namespace: "/test/".into(),
        },
    }
}
