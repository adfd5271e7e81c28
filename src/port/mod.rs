//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! # Architecture
//!
//! ```text
//!        caller (CLI, scheduler, ...)
//!                   │  NodeOperation
//!                   ▼
//!     ┌───────────────────────────┐
//!     │        Application        │
//!     │ retry · pool · cluster    │
//!     └─────────────┬─────────────┘
//!                   │  CloudProvider
//!                   ▼
//!           cloud control plane
//! ```
//!
//! # Available Ports
//!
//! - [`CloudProvider`] - instance lookup, creation, tagging and lifecycle
//! - [`NodeOperation`] - caller-supplied work applied to cluster nodes

pub mod inbound;
pub mod outbound;

pub use inbound::operation::{operation_fn, FnOperation, NodeOperation};
pub use outbound::cloud::CloudProvider;
