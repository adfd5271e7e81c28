//! Application services (use cases).
//!
//! These services orchestrate domain logic against the cloud provider port:
//! retrying transient failures, bounding concurrency and coordinating
//! leader/worker clusters.

pub mod cluster;
pub mod node;
pub mod pool;
pub mod retry;

pub use cluster::{ApplyOptions, Cluster, ClusterLeader, GrowReport};
pub use node::{NodeService, Selector};
pub use pool::{default_pool_size, BatchHandle, BatchSummary, ConcurrencyPool};
pub use retry::{retry, RetryPolicy};
