//! Infrastructure configuration modules.
//!
//! Configuration is loaded from a TOML file; every section is optional and
//! falls back to production defaults.

pub mod cluster;
pub mod logging;
pub mod pool;
pub mod retry;
pub mod settings;

pub use cluster::{ClusterConfig, ReadinessConfig};
pub use logging::LoggingConfig;
pub use pool::PoolConfig;
pub use retry::RetryConfig;
pub use settings::Config;
