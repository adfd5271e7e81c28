//! Fleetwright - leader/worker cluster orchestration over an eventually
//! consistent cloud control plane.
//!
//! This crate creates, binds, images and tears down fleets of cloud
//! instances and assembles them into clusters of one leader and any number
//! of workers bound to it.
//!
//! # Architecture
//!
//! The crate follows a ports-and-adapters layout:
//!
//! - **`domain`** - Provider-agnostic types
//!   - `Node` with `Bindable` / `Clusterable` / `Leader` / `Worker` capabilities
//!   - `Role` with an explicit image role and provisioning profile
//!   - `PackageResolver` - cycle-tolerant package-name substitution
//!
//! - **`port`** - `CloudProvider` (outbound) and `NodeOperation` (inbound)
//!
//! - **`application`** - Use cases on top of the ports
//!   - `RetryPolicy` - deadline-bounded retry of transient cloud failures
//!   - `ConcurrencyPool` - bounded, order-preserving fan-out
//!   - `Cluster` / `ClusterLeader` - the leader/worker protocol
//!
//! # Modules
//!
//! - [`application`] - Retry, pooling, node lifecycle and cluster coordination
//! - [`domain`] - Nodes, roles, instances, ordinals and package substitution
//! - [`error`] - Error types for the crate
//! - [`infrastructure`] - Configuration loading and logging setup
//! - [`port`] - Trait definitions for cloud providers and node operations
//! - [`testkit`] - In-memory cloud and test fixtures (requires `testkit` feature)
//!
//! # Features
//!
//! - `testkit` - Expose [`testkit`] to integration tests and downstream crates
//!
//! # Example
//!
//! ```
//! use fleetwright::domain::package::{PackageResolver, Substitute, SubstitutionGraph};
//!
//! let graph = SubstitutionGraph::from_pairs([
//!     ("python-dev", Substitute::one("python3-dev")),
//!     ("docs", Substitute::Nothing),
//! ])
//! .unwrap();
//! let install = PackageResolver::new(&graph).resolve(&["python-dev", "docs", "git"]).unwrap();
//! assert_eq!(install.into_iter().collect::<Vec<_>>(), ["git", "python3-dev"]);
//! ```

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
