//! Built-in lifecycle operations.
//!
//! Starting brings the leader up before its workers; stopping and
//! terminating take the workers down first.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::node::NodeService;
use crate::domain::node::Node;
use crate::error::Result;
use crate::port::inbound::operation::NodeOperation;

/// Start a stopped node.
pub struct StartNode {
    nodes: Arc<NodeService>,
}

impl StartNode {
    pub const LEADER_FIRST: bool = true;

    #[must_use]
    pub const fn new(nodes: Arc<NodeService>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl NodeOperation for StartNode {
    fn name(&self) -> &str {
        "start"
    }

    async fn run(&self, mut node: Node) -> Result<()> {
        self.nodes.start(&mut node).await
    }
}

/// Stop a running node.
pub struct StopNode {
    nodes: Arc<NodeService>,
}

impl StopNode {
    pub const LEADER_FIRST: bool = false;

    #[must_use]
    pub const fn new(nodes: Arc<NodeService>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl NodeOperation for StopNode {
    fn name(&self) -> &str {
        "stop"
    }

    async fn run(&self, mut node: Node) -> Result<()> {
        self.nodes.stop(&mut node).await
    }
}

/// Terminate a node, optionally waiting until it is gone.
pub struct TerminateNode {
    nodes: Arc<NodeService>,
    wait: bool,
}

impl TerminateNode {
    pub const LEADER_FIRST: bool = false;

    #[must_use]
    pub const fn new(nodes: Arc<NodeService>, wait: bool) -> Self {
        Self { nodes, wait }
    }
}

#[async_trait]
impl NodeOperation for TerminateNode {
    fn name(&self) -> &str {
        "terminate"
    }

    async fn run(&self, node: Node) -> Result<()> {
        self.nodes.terminate(&node, self.wait).await
    }
}
