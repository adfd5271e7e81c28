//! Adding workers to a running cluster.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::Cluster;
use crate::application::node::Selector;
use crate::domain::id::InstanceId;
use crate::domain::instance::{Instance, TAG_LEADER_INSTANCE_ID};
use crate::domain::node::{Bindable, Clusterable, CreationArgs, Node};
use crate::domain::ordinal::allocate_cluster_ordinals;
use crate::error::{Error, Result};

/// Outcome of [`Cluster::grow`]: every new worker is either ready or failed.
#[derive(Debug, Default)]
pub struct GrowReport {
    /// Workers confirmed running.
    pub ready: Vec<Node>,
    /// Workers that didn't become ready, with the reason.
    pub failed: Vec<(InstanceId, Error)>,
}

impl GrowReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Cluster {
    /// Add `count` workers to the cluster of an existing leader.
    ///
    /// New workers fill gaps in the ordinals already taken before counting
    /// past the highest one. They are launched by one request and awaited
    /// best-effort: a worker that fails to come up is reported, not fatal.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::NoSuchLeader`](crate::error::ClusterError::NoSuchLeader)
    /// if the leader can't be located, or the error that prevented the
    /// workers from being launched.
    pub async fn grow(
        &self,
        selector: &Selector,
        count: usize,
        mut args: CreationArgs,
        pool_size: Option<usize>,
    ) -> Result<GrowReport> {
        let leader = self.locate_leader(selector).await?;
        let leader_id = leader.require_instance_id()?.clone();

        let existing = self
            .nodes
            .list_workers(self.worker_role.name(), &leader_id)
            .await?;
        let mut used: BTreeSet<u32> = existing
            .iter()
            .map(Instance::cluster_ordinal)
            .collect();
        used.insert(leader.cluster_ordinal().unwrap_or(0));
        let ordinals = allocate_cluster_ordinals(count, &used);
        info!(
            leader = %leader_id,
            existing = existing.len(),
            ordinals = ?ordinals,
            "Growing cluster"
        );

        args.cluster_name = leader.cluster_name();
        args.options
            .insert(TAG_LEADER_INSTANCE_ID.into(), leader_id.to_string());
        let mut prototype = Node::new(self.worker_role.clone());
        let spec = prototype.prepare(args)?;
        let workers = self.nodes.create(&prototype, &spec, &ordinals).await?;
        let worker_ids: Vec<InstanceId> = workers
            .iter()
            .filter_map(|worker| worker.instance_id().cloned())
            .collect();

        let report = Arc::new(Mutex::new(GrowReport::default()));
        let sink = Arc::clone(&report);
        let nodes = Arc::clone(&self.nodes);
        let handle = self
            .pool
            .apply_async(
                workers,
                move |mut worker: Node| {
                    let nodes = Arc::clone(&nodes);
                    async move {
                        nodes.wait_ready(&mut worker).await?;
                        Ok(worker)
                    }
                },
                pool_size,
                move |index, outcome: Result<Node>| {
                    let mut report = sink.lock();
                    match outcome {
                        Ok(worker) => report.ready.push(worker),
                        Err(err) => {
                            let id = worker_ids
                                .get(index)
                                .cloned()
                                .unwrap_or_else(|| InstanceId::new("unknown"));
                            warn!(worker = %id, error = %err, "Worker did not become ready");
                            report.failed.push((id, err));
                        }
                    }
                    Ok(())
                },
            )
            .await;
        let summary = handle.wait().await?;
        info!(
            ready = summary.completed,
            failed = summary.failed,
            "Cluster grown"
        );

        let mut report = std::mem::take(&mut *report.lock());
        report.ready.sort_by_key(|worker| worker.cluster_ordinal());
        Ok(report)
    }
}
