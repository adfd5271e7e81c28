//! Node lifecycle against the cloud provider.
//!
//! Every provider call goes through a [`RetryPolicy`]: the short budget for
//! lookups, tagging and lifecycle calls, the long one for launching
//! instances, which races IAM and security-group propagation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::retry::{self, RetryPolicy};
use crate::domain::id::{ClusterName, ImageId, InstanceId, Namespace, RoleName};
use crate::domain::instance::{
    launch_order, Instance, InstanceSpec, InstanceState, Tags, FILTER_INSTANCE_ID,
    TAG_CLUSTER_NAME, TAG_LEADER_INSTANCE_ID, TAG_NAME,
};
use crate::domain::node::{Bindable, Node};
use crate::error::{CloudError, ClusterError, Result};
use crate::infrastructure::config::cluster::ReadinessConfig;
use crate::infrastructure::config::retry::RetryConfig;
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::cloud::CloudProvider;

/// Which of several instances performing a role to bind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    /// Only consider instances of this cluster.
    pub cluster_name: Option<ClusterName>,
    /// Position in launch order; negative values count from the newest.
    pub ordinal: Option<i64>,
}

impl Selector {
    #[must_use]
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            cluster_name: Some(ClusterName::new(name)),
            ordinal: None,
        }
    }

    #[must_use]
    pub const fn with_ordinal(mut self, ordinal: i64) -> Self {
        self.ordinal = Some(ordinal);
        self
    }
}

/// Binds, creates and transitions nodes.
pub struct NodeService {
    cloud: Arc<dyn CloudProvider>,
    retry: RetryConfig,
    readiness: ReadinessConfig,
    namespace: Namespace,
}

impl NodeService {
    #[must_use]
    pub fn new(cloud: Arc<dyn CloudProvider>, config: &Config) -> Self {
        Self::with_settings(
            cloud,
            config.retry.clone(),
            config.readiness.clone(),
            Namespace::new(config.cluster.namespace.as_str()),
        )
    }

    #[must_use]
    pub const fn with_settings(
        cloud: Arc<dyn CloudProvider>,
        retry: RetryConfig,
        readiness: ReadinessConfig,
        namespace: Namespace,
    ) -> Self {
        Self {
            cloud,
            retry,
            readiness,
            namespace,
        }
    }

    #[must_use]
    pub fn cloud(&self) -> &Arc<dyn CloudProvider> {
        &self.cloud
    }

    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn short(&self) -> RetryPolicy {
        RetryPolicy::short(&self.retry)
    }

    fn long(&self) -> RetryPolicy {
        RetryPolicy::long(&self.retry)
    }

    fn qualified(&self, role: &RoleName) -> RoleName {
        RoleName::new(self.namespace.qualify(role))
    }

    /// Live instances performing `role`, oldest first.
    ///
    /// With a cluster name, only instances of that cluster are kept; an
    /// instance without a cluster name tag belongs to the cluster named after
    /// its own ID.
    ///
    /// # Errors
    ///
    /// Returns the provider's error once retries are exhausted.
    pub async fn list_role(
        &self,
        role: &RoleName,
        cluster_name: Option<&ClusterName>,
    ) -> Result<Vec<Instance>> {
        let name = self.qualified(role);
        let mut instances = self
            .short()
            .run(retry::is_transient, || {
                self.cloud.list_instances(TAG_NAME, name.as_str())
            })
            .await?;
        instances.retain(|instance| {
            !instance.is_terminated()
                && cluster_name.map_or(true, |wanted| {
                    instance
                        .tag(TAG_CLUSTER_NAME)
                        .unwrap_or_else(|| instance.id.as_str())
                        == wanted.as_str()
                })
        });
        instances.sort_by(launch_order);
        Ok(instances)
    }

    /// Live instances of `worker_role` working for `leader`, sorted by ID.
    ///
    /// # Errors
    ///
    /// Returns the provider's error once retries are exhausted.
    pub async fn list_workers(
        &self,
        worker_role: &RoleName,
        leader: &InstanceId,
    ) -> Result<Vec<Instance>> {
        let name = self.qualified(worker_role);
        let mut instances = self
            .short()
            .run(retry::is_transient, || {
                self.cloud
                    .list_instances(TAG_LEADER_INSTANCE_ID, leader.as_str())
            })
            .await?;
        instances.retain(|instance| {
            !instance.is_terminated() && instance.tag(TAG_NAME) == Some(name.as_str())
        });
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    /// Bind `node` to the instance `selector` picks among those performing
    /// its role.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::NoSuchLeader`] if no instance performs the
    /// role, [`ClusterError::AmbiguousLeader`] if several do and no ordinal
    /// was given, or [`ClusterError::NoSuchOrdinal`] if the ordinal is out of
    /// range.
    pub async fn bind(&self, node: &mut Node, selector: &Selector) -> Result<()> {
        let role = node.role_name().clone();
        let instances = self
            .list_role(&role, selector.cluster_name.as_ref())
            .await?;
        let instance = select_instance(&role, instances, selector.ordinal)?;
        node.bind(&instance)?;
        info!(role = %role, instance_id = %instance.id, "Bound node");
        Ok(())
    }

    /// Bind `node` to the instance with the given ID, retrying while the
    /// provider doesn't know it yet.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::NoSuchInstance`] if no such instance performs
    /// the node's role.
    pub async fn rebind(&self, node: &mut Node, instance_id: &InstanceId) -> Result<()> {
        let role = node.role_name().clone();
        let name = self.qualified(&role);
        let filter = Tags::from([(FILTER_INSTANCE_ID.to_string(), instance_id.to_string())]);
        let found = self
            .short()
            .run(retry::not_found_yet, || async {
                self.cloud
                    .find_instance(&name, &filter)
                    .await?
                    .ok_or_else(|| {
                        CloudError::permanent(
                            "InvalidInstanceID.NotFound",
                            format!("instance {instance_id} not found"),
                        )
                    })
            })
            .await;
        let instance = match found {
            Ok(instance) => instance,
            Err(err) if err.is_not_found() => {
                return Err(ClusterError::NoSuchInstance {
                    role: role.to_string(),
                    instance_id: instance_id.clone(),
                }
                .into())
            }
            Err(err) => return Err(err.into()),
        };
        node.bind(&instance)?;
        debug!(role = %role, instance_id = %instance.id, "Rebound node");
        Ok(())
    }

    /// Launch one instance per ordinal from `spec` and bind each to a copy of
    /// `prototype`.
    ///
    /// The instances are launched by a single request, sorted by ID, assigned
    /// `ordinals` in order and tagged.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::CreationShortfall`] if the provider launched a
    /// different number of instances, or the provider's error once retries
    /// are exhausted.
    pub async fn create(
        &self,
        prototype: &Node,
        spec: &InstanceSpec,
        ordinals: &[u32],
    ) -> Result<Vec<Node>> {
        let requested = ordinals.len();
        if requested == 0 {
            return Ok(Vec::new());
        }
        info!(
            role = %spec.role,
            count = requested,
            instance_type = %spec.instance_type,
            "Creating instances"
        );
        let mut instances = self
            .long()
            .run(retry::creation_race, || {
                self.cloud.create_instances(spec, requested)
            })
            .await?;
        if instances.len() != requested {
            return Err(ClusterError::CreationShortfall {
                requested,
                created: instances.len(),
            }
            .into());
        }
        instances.sort_by(|a, b| a.id.cmp(&b.id));

        let mut nodes = Vec::with_capacity(requested);
        for (instance, &ordinal) in instances.iter().zip(ordinals) {
            let mut node = prototype.clone();
            node.bind_created(instance, ordinal)?;
            let tags = node.instance_tags(&self.namespace);
            self.short()
                .run(retry::not_found_yet, || {
                    self.cloud.tag_instance(&instance.id, &tags)
                })
                .await?;
            debug!(instance_id = %instance.id, ordinal, "Tagged instance");
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Wait until the node's instance is running and mark it provisioned.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnexpectedState`] if the instance leaves the
    /// pending state for anything but running, or
    /// [`ClusterError::ReadinessTimeout`] if it takes too long.
    pub async fn wait_ready(&self, node: &mut Node) -> Result<()> {
        let instance_id = node.require_instance_id()?.clone();
        self.wait_transition(&instance_id, &[InstanceState::Pending], InstanceState::Running)
            .await?;
        let instance = self.describe(&instance_id).await?;
        node.mark_provisioned(&instance)?;
        info!(instance_id = %instance_id, "Instance ready");
        Ok(())
    }

    /// Stop a running instance and wait until it has stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnexpectedState`] if the instance isn't
    /// running.
    pub async fn stop(&self, node: &mut Node) -> Result<()> {
        let instance_id = node.require_instance_id()?.clone();
        self.expect_state(&instance_id, InstanceState::Running).await?;
        self.short()
            .run(retry::is_transient, || self.cloud.stop_instance(&instance_id))
            .await?;
        self.wait_transition(
            &instance_id,
            &[InstanceState::Running, InstanceState::Stopping],
            InstanceState::Stopped,
        )
        .await?;
        info!(instance_id = %instance_id, "Instance stopped");
        Ok(())
    }

    /// Start a stopped instance and wait until it is running.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::UnexpectedState`] if the instance isn't
    /// stopped.
    pub async fn start(&self, node: &mut Node) -> Result<()> {
        let instance_id = node.require_instance_id()?.clone();
        self.expect_state(&instance_id, InstanceState::Stopped).await?;
        self.short()
            .run(retry::is_transient, || self.cloud.start_instance(&instance_id))
            .await?;
        self.wait_transition(
            &instance_id,
            &[InstanceState::Stopped, InstanceState::Pending],
            InstanceState::Running,
        )
        .await?;
        let instance = self.describe(&instance_id).await?;
        node.mark_provisioned(&instance)?;
        info!(instance_id = %instance_id, "Instance started");
        Ok(())
    }

    /// Terminate the node's instance, optionally waiting until it is gone.
    ///
    /// # Errors
    ///
    /// Returns the provider's error once retries are exhausted.
    pub async fn terminate(&self, node: &Node, wait: bool) -> Result<()> {
        let instance_id = node.require_instance_id()?.clone();
        self.short()
            .run(retry::is_transient, || {
                self.cloud.terminate_instance(&instance_id)
            })
            .await?;
        info!(instance_id = %instance_id, "Terminating instance");
        if wait {
            self.wait_transition(
                &instance_id,
                &[
                    InstanceState::Pending,
                    InstanceState::Running,
                    InstanceState::ShuttingDown,
                    InstanceState::Stopping,
                    InstanceState::Stopped,
                ],
                InstanceState::Terminated,
            )
            .await?;
        }
        Ok(())
    }

    /// Snapshot the node's instance into an image.
    ///
    /// # Errors
    ///
    /// Returns the provider's error once retries are exhausted.
    pub async fn create_image(&self, node: &Node) -> Result<ImageId> {
        let instance_id = node.require_instance_id()?.clone();
        let image_id = self
            .short()
            .run(retry::is_transient, || self.cloud.create_image(&instance_id))
            .await?;
        info!(
            instance_id = %instance_id,
            image_id = %image_id,
            image_prefix = node.role().image_name_prefix(),
            "Created image"
        );
        Ok(image_id)
    }

    async fn describe(&self, instance_id: &InstanceId) -> Result<Instance> {
        Ok(self
            .short()
            .run(retry::not_found_yet, || {
                self.cloud.describe_instance(instance_id)
            })
            .await?)
    }

    async fn state_of(&self, instance_id: &InstanceId) -> Result<InstanceState> {
        Ok(self
            .short()
            .run(retry::not_found_yet, || {
                self.cloud.describe_instance_state(instance_id)
            })
            .await?)
    }

    async fn expect_state(&self, instance_id: &InstanceId, expected: InstanceState) -> Result<()> {
        let actual = self.state_of(instance_id).await?;
        if actual != expected {
            return Err(ClusterError::UnexpectedState {
                instance_id: instance_id.clone(),
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Poll until the instance reaches `to`, tolerating `from` meanwhile.
    async fn wait_transition(
        &self,
        instance_id: &InstanceId,
        from: &[InstanceState],
        to: InstanceState,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = started.checked_add(Duration::from_millis(self.readiness.timeout_ms));
        let interval = Duration::from_millis(self.readiness.poll_interval_ms);
        loop {
            let state = self.state_of(instance_id).await?;
            if state == to {
                return Ok(());
            }
            if !from.contains(&state) {
                return Err(ClusterError::UnexpectedState {
                    instance_id: instance_id.clone(),
                    expected: to,
                    actual: state,
                }
                .into());
            }
            if poll_past_deadline(deadline, interval) {
                return Err(ClusterError::ReadinessTimeout {
                    instance_id: instance_id.clone(),
                    waited_ms: started.elapsed().as_millis(),
                }
                .into());
            }
            debug!(instance_id = %instance_id, state = %state, target = %to, "Waiting for transition");
            sleep(interval).await;
        }
    }
}

/// A timeout too large for the clock never expires.
fn poll_past_deadline(deadline: Option<Instant>, interval: Duration) -> bool {
    let Some(deadline) = deadline else {
        return false;
    };
    Instant::now()
        .checked_add(interval)
        .map_or(true, |next| next > deadline)
}

/// Pick one instance out of those performing `role`, sorted oldest first.
fn select_instance(
    role: &RoleName,
    mut instances: Vec<Instance>,
    ordinal: Option<i64>,
) -> std::result::Result<Instance, ClusterError> {
    let count = instances.len();
    if count == 0 {
        return Err(ClusterError::NoSuchLeader {
            role: role.to_string(),
        });
    }
    let index = match ordinal {
        None if count == 1 => 0,
        None => {
            return Err(ClusterError::AmbiguousLeader {
                role: role.to_string(),
                count,
            })
        }
        Some(ordinal) => {
            let resolved = if ordinal < 0 {
                i64::try_from(count).unwrap_or(i64::MAX) + ordinal
            } else {
                ordinal
            };
            match usize::try_from(resolved) {
                Ok(index) if index < count => index,
                _ => {
                    return Err(ClusterError::NoSuchOrdinal {
                        role: role.to_string(),
                        ordinal,
                    })
                }
            }
        }
    };
    Ok(instances.swap_remove(index))
}
