//! Leader/worker cluster coordination.
//!
//! Every cluster-level operation starts by locating the leader and fails
//! before touching any worker if there is none. Workers are discovered
//! through the `leader_instance_id` tag and each one is rebound from a fresh
//! copy of a prototype node, so no node is ever shared between tasks.
//!
//! # Architecture
//!
//! ```text
//! Cluster::apply ──► locate_leader ──► leader op ─┐  (leader first)
//!                                                 ▼
//!                        list_workers ──► ConcurrencyPool::map
//!                                             │ rebind
//!                                             │ [wait_ready]
//!                                             ▼ operation
//! ```

mod grow;
mod leader;
mod lifecycle;

pub use grow::GrowReport;
pub use leader::ClusterLeader;
pub use lifecycle::{StartNode, StopNode, TerminateNode};

use std::sync::Arc;

use tracing::{info, warn};

use super::node::{NodeService, Selector};
use super::pool::ConcurrencyPool;
use crate::domain::id::InstanceId;
use crate::domain::node::{Bindable, CreationArgs, Node};
use crate::domain::role::Role;
use crate::error::{ClusterError, Error, PoolError, Result};
use crate::port::inbound::operation::NodeOperation;

/// How [`Cluster::apply`] runs an operation.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Run on the leader before the workers instead of after.
    pub leader_first: bool,
    /// Workers handled concurrently; `None` sizes the pool automatically.
    pub pool_size: Option<usize>,
    /// Wait for each node to be running before applying the operation.
    pub wait_ready: bool,
    /// Which leader to operate on.
    pub selector: Selector,
}

impl ApplyOptions {
    #[must_use]
    pub fn leader_first() -> Self {
        Self {
            leader_first: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn workers_first() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    #[must_use]
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    #[must_use]
    pub const fn waiting_until_ready(mut self) -> Self {
        self.wait_ready = true;
        self
    }
}

/// A leader role and the worker role that serves it.
pub struct Cluster {
    nodes: Arc<NodeService>,
    pool: ConcurrencyPool,
    leader_role: Role,
    worker_role: Role,
}

impl Cluster {
    #[must_use]
    pub const fn new(
        nodes: Arc<NodeService>,
        pool: ConcurrencyPool,
        leader_role: Role,
        worker_role: Role,
    ) -> Self {
        Self {
            nodes,
            pool,
            leader_role,
            worker_role,
        }
    }

    #[must_use]
    pub const fn leader_role(&self) -> &Role {
        &self.leader_role
    }

    #[must_use]
    pub const fn worker_role(&self) -> &Role {
        &self.worker_role
    }

    /// Bind a leader node to the instance `selector` picks.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::NoSuchLeader`] if no instance performs the
    /// leader role.
    pub async fn locate_leader(&self, selector: &Selector) -> Result<Node> {
        let mut leader = Node::new(self.leader_role.clone());
        self.nodes.bind(&mut leader, selector).await?;
        Ok(leader)
    }

    /// Run `operation` on the leader and on every one of its workers.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::NoSuchLeader`] without touching any worker if
    /// the leader can't be located, the leader's own failure unchanged, or
    /// [`ClusterError::PartialBatchFailure`] naming the first worker that
    /// failed. The remaining workers are aborted in that case.
    pub async fn apply(&self, operation: Arc<dyn NodeOperation>, options: ApplyOptions) -> Result<()> {
        let leader = self.locate_leader(&options.selector).await?;
        info!(
            operation = operation.name(),
            leader_first = options.leader_first,
            leader = %leader.require_instance_id()?,
            "Applying operation to cluster"
        );
        if options.leader_first {
            self.run_on_leader(&operation, leader.clone(), options.wait_ready)
                .await?;
            self.run_on_workers(&operation, &leader, &options).await
        } else {
            self.run_on_workers(&operation, &leader, &options).await?;
            self.run_on_leader(&operation, leader, options.wait_ready)
                .await
        }
    }

    /// Start a stopped cluster, leader first.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn start(&self, selector: Selector, pool_size: Option<usize>) -> Result<()> {
        let options = ApplyOptions {
            leader_first: StartNode::LEADER_FIRST,
            pool_size,
            wait_ready: false,
            selector,
        };
        self.apply(Arc::new(StartNode::new(Arc::clone(&self.nodes))), options)
            .await
    }

    /// Stop a running cluster, workers first.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn stop(&self, selector: Selector, pool_size: Option<usize>) -> Result<()> {
        let options = ApplyOptions {
            leader_first: StopNode::LEADER_FIRST,
            pool_size,
            wait_ready: false,
            selector,
        };
        self.apply(Arc::new(StopNode::new(Arc::clone(&self.nodes))), options)
            .await
    }

    /// Terminate a cluster, workers first.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn terminate(
        &self,
        selector: Selector,
        pool_size: Option<usize>,
        wait: bool,
    ) -> Result<()> {
        let options = ApplyOptions {
            leader_first: TerminateNode::LEADER_FIRST,
            pool_size,
            wait_ready: false,
            selector,
        };
        let operation = TerminateNode::new(Arc::clone(&self.nodes), wait);
        self.apply(Arc::new(operation), options).await
    }

    /// Create a leader from `leader_args`, wait for it and clone
    /// `num_workers` workers from it.
    ///
    /// Returns the ready leader and its ready workers.
    ///
    /// # Errors
    ///
    /// Fails if the leader can't be created, or as
    /// [`ClusterLeader::clone_with_pool_size`] does.
    pub async fn create(
        &self,
        leader_args: CreationArgs,
        num_workers: usize,
        worker_instance_type: Option<&str>,
        pool_size: Option<usize>,
    ) -> Result<(Node, Vec<Node>)> {
        let mut prototype = Node::new(self.leader_role.clone());
        let spec = prototype.prepare(leader_args)?;
        let mut leader = self
            .nodes
            .create(&prototype, &spec, &[0])
            .await?
            .pop()
            .ok_or(ClusterError::CreationShortfall {
                requested: 1,
                created: 0,
            })?;
        self.nodes.wait_ready(&mut leader).await?;

        let leader = ClusterLeader::new(leader, Arc::clone(&self.nodes), self.pool.clone());
        let workers = leader
            .clone_with_pool_size(&self.worker_role, num_workers, worker_instance_type, pool_size)
            .await?;
        Ok((leader.into_node(), workers))
    }

    async fn run_on_leader(
        &self,
        operation: &Arc<dyn NodeOperation>,
        mut leader: Node,
        wait_ready: bool,
    ) -> Result<()> {
        if wait_ready {
            self.nodes.wait_ready(&mut leader).await?;
        }
        operation.run(leader).await
    }

    async fn run_on_workers(
        &self,
        operation: &Arc<dyn NodeOperation>,
        leader: &Node,
        options: &ApplyOptions,
    ) -> Result<()> {
        let leader_id = leader.require_instance_id()?;
        let worker_ids: Vec<InstanceId> = self
            .nodes
            .list_workers(self.worker_role.name(), leader_id)
            .await?
            .into_iter()
            .map(|instance| instance.id)
            .collect();
        if worker_ids.is_empty() {
            return Ok(());
        }
        info!(
            operation = operation.name(),
            workers = worker_ids.len(),
            "Applying operation to workers"
        );

        let prototype = Node::new(self.worker_role.clone());
        let nodes = Arc::clone(&self.nodes);
        let operation = Arc::clone(operation);
        let wait_ready = options.wait_ready;
        self.pool
            .map(
                worker_ids.clone(),
                move |instance_id| {
                    let mut worker = prototype.clone();
                    let nodes = Arc::clone(&nodes);
                    let operation = Arc::clone(&operation);
                    async move {
                        nodes.rebind(&mut worker, &instance_id).await?;
                        if wait_ready {
                            nodes.wait_ready(&mut worker).await?;
                        }
                        operation.run(worker).await
                    }
                },
                options.pool_size,
            )
            .await
            .map(|_| ())
            .map_err(|err| attribute_failure(err, &worker_ids))
    }
}

/// Name the node behind a failed fan-out task.
pub(crate) fn attribute_failure(err: Error, nodes: &[InstanceId]) -> Error {
    let Error::Pool(pool_err) = err else {
        return err;
    };
    let Some(node) = pool_err.index().and_then(|index| nodes.get(index)).cloned() else {
        return pool_err.into();
    };
    warn!(node = %node, error = %pool_err, "Fan-out failed");
    let source = match pool_err {
        PoolError::TaskFailed { source, .. } => source,
        other => Box::new(other.into()),
    };
    ClusterError::PartialBatchFailure { node, source }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;

    fn ids() -> Vec<InstanceId> {
        vec![InstanceId::new("i-a"), InstanceId::new("i-b")]
    }

    #[test]
    fn test_task_failure_names_the_node() {
        let err = PoolError::TaskFailed {
            index: 1,
            total: 2,
            source: Box::new(CloudError::permanent("Boom", "").into()),
        };
        match attribute_failure(err.into(), &ids()) {
            Error::Cluster(ClusterError::PartialBatchFailure { node, source }) => {
                assert_eq!(node.as_str(), "i-b");
                assert!(matches!(*source, Error::Cloud(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_panic_names_the_node() {
        let err = PoolError::TaskPanicked {
            index: 0,
            total: 2,
            message: "boom".into(),
        };
        let err = attribute_failure(err.into(), &ids());
        assert!(matches!(
            err,
            Error::Cluster(ClusterError::PartialBatchFailure { ref node, .. }) if node.as_str() == "i-a"
        ));
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err = attribute_failure(CloudError::permanent("Boom", "").into(), &ids());
        assert!(matches!(err, Error::Cloud(_)));
    }

    #[test]
    fn test_apply_options_ordering() {
        assert!(ApplyOptions::leader_first().leader_first);
        assert!(!ApplyOptions::workers_first().leader_first);
        assert_eq!(ApplyOptions::leader_first().with_pool_size(3).pool_size, Some(3));
    }
}
