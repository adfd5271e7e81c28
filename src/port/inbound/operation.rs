//! Operations applied to the nodes of a cluster.
//!
//! An operation receives its own copy of a node and owns whatever side
//! effects it causes; the orchestrator only decides where and in which order
//! it runs.

use std::future::Future;

use async_trait::async_trait;

use crate::domain::node::Node;
use crate::error::Result;

/// A caller-supplied action performed on one node.
#[async_trait]
pub trait NodeOperation: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    async fn run(&self, node: Node) -> Result<()>;
}

/// Adapter turning an async closure into a [`NodeOperation`].
pub struct FnOperation<F> {
    name: String,
    f: F,
}

/// Wrap `f` as a named operation.
///
/// ```
/// use fleetwright::port::inbound::operation::{operation_fn, NodeOperation};
///
/// let op = operation_fn("noop", |_node| async { Ok(()) });
/// assert_eq!(op.name(), "noop");
/// ```
pub fn operation_fn<F, Fut>(name: impl Into<String>, f: F) -> FnOperation<F>
where
    F: Fn(Node) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    FnOperation {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> NodeOperation for FnOperation<F>
where
    F: Fn(Node) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, node: Node) -> Result<()> {
        (self.f)(node).await
    }
}
