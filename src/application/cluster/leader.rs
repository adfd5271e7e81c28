//! Cloning workers from a leader.

use std::sync::Arc;

use tracing::info;

use super::attribute_failure;
use crate::application::node::NodeService;
use crate::application::pool::ConcurrencyPool;
use crate::domain::id::InstanceId;
use crate::domain::node::{Bindable, Clusterable, Leader, Node};
use crate::domain::role::Role;
use crate::error::Result;

/// A leader node that knows how it was created and can clone workers.
pub struct ClusterLeader {
    node: Node,
    nodes: Arc<NodeService>,
    pool: ConcurrencyPool,
}

impl ClusterLeader {
    #[must_use]
    pub const fn new(node: Node, nodes: Arc<NodeService>, pool: ConcurrencyPool) -> Self {
        Self { node, nodes, pool }
    }

    #[must_use]
    pub const fn node(&self) -> &Node {
        &self.node
    }

    #[must_use]
    pub fn into_node(self) -> Node {
        self.node
    }

    /// Create `count` workers of `worker_role` bound to this leader and wait
    /// until all of them are running.
    ///
    /// Workers inherit the leader's creation arguments, optionally with a
    /// different instance type, and take the ordinals following the
    /// leader's. They are launched by one request and awaited with a pool
    /// sized for `count`.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Unbound`](crate::error::ClusterError::Unbound)
    /// before creating anything if the leader's instance ID isn't known,
    /// [`ClusterError::LeaderNotPrepared`](crate::error::ClusterError::LeaderNotPrepared)
    /// if the leader wasn't created here, or
    /// [`ClusterError::PartialBatchFailure`](crate::error::ClusterError::PartialBatchFailure)
    /// naming the first worker that didn't become ready.
    pub async fn clone(
        &self,
        worker_role: &Role,
        count: usize,
        worker_instance_type: Option<&str>,
    ) -> Result<Vec<Node>> {
        self.clone_with_pool_size(worker_role, count, worker_instance_type, None)
            .await
    }

    /// [`clone`](Self::clone) with an explicit readiness pool size.
    ///
    /// # Errors
    ///
    /// See [`clone`](Self::clone).
    pub async fn clone_with_pool_size(
        &self,
        worker_role: &Role,
        count: usize,
        worker_instance_type: Option<&str>,
        pool_size: Option<usize>,
    ) -> Result<Vec<Node>> {
        let args = self.node.worker_args(worker_instance_type)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let first = self.node.cluster_ordinal().unwrap_or(0) + 1;
        let ordinals: Vec<u32> = (first..).take(count).collect();

        let mut prototype = Node::new(worker_role.clone());
        let spec = prototype.prepare(args)?;
        let workers = self.nodes.create(&prototype, &spec, &ordinals).await?;
        let worker_ids: Vec<InstanceId> = workers
            .iter()
            .filter_map(|worker| worker.instance_id().cloned())
            .collect();
        info!(
            leader = %self.node.require_instance_id()?,
            workers = workers.len(),
            "Waiting for workers"
        );

        let nodes = Arc::clone(&self.nodes);
        let size = pool_size.or_else(|| Some(self.pool.default_pool_size(count)));
        self.pool
            .map(
                workers,
                move |mut worker: Node| {
                    let nodes = Arc::clone(&nodes);
                    async move {
                        nodes.wait_ready(&mut worker).await?;
                        Ok(worker)
                    }
                },
                size,
            )
            .await
            .map_err(|err| attribute_failure(err, &worker_ids))
    }
}
