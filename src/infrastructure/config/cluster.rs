//! Cluster and readiness configuration.

use serde::Deserialize;

/// Cluster-wide naming.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Prefix of every resource name, e.g. `/alice/`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "/".into()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

/// How long and how often to poll a booting instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    /// Interval between state polls (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up waiting after this long (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_poll_interval_ms() -> u64 {
    5_000
}

const fn default_timeout_ms() -> u64 {
    1_800_000
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}
