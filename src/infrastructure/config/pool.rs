//! Concurrency pool configuration.

use serde::Deserialize;

/// Sizing of the per-batch worker pools.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on tasks run concurrently in one batch.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Hardware parallelism; detected when absent.
    #[serde(default)]
    pub parallelism: Option<usize>,
    /// Tasks per unit of hardware parallelism when no size is given.
    #[serde(default = "default_parallelism_factor")]
    pub parallelism_factor: usize,
}

const fn default_max_pool_size() -> usize {
    100
}

const fn default_parallelism_factor() -> usize {
    10
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            parallelism: None,
            parallelism_factor: default_parallelism_factor(),
        }
    }
}
