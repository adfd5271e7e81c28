//! Nodes: provisioned compute instances and their cluster capabilities.
//!
//! A [`Node`] is one struct whose [`NodeKind`] says whether it leads a
//! cluster, works for one or stands alone. Capabilities are small traits over
//! that struct:
//!
//! - [`Bindable`] - association with an existing cloud instance
//! - [`Clusterable`] - ordinal, shared image role and cluster name
//! - [`Leader`] - remembers its creation arguments and derives worker arguments
//! - [`Worker`] - knows its leader's instance ID
//!
//! Fan-out never shares a node: every worker gets its own copy of a
//! prototype.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::id::{ClusterName, ImageId, InstanceId, Namespace, RoleName};
use super::instance::{
    Instance, InstanceSpec, Tags, TAG_CLUSTER_NAME, TAG_CLUSTER_ORDINAL, TAG_LEADER_INSTANCE_ID,
    TAG_NAME,
};
use super::role::{Role, RoleKind};
use crate::error::{ClusterError, Result};

/// Free-form options carried from leader to workers and persisted as tags.
pub type BindingOptions = BTreeMap<String, String>;

/// Binding option holding the size in GB of the persistent data volume.
pub const OPT_EBS_VOLUME_SIZE: &str = "ebs_volume_size";

/// Arguments a node was (or will be) created with.
///
/// A leader keeps these so it can derive its workers' arguments later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationArgs {
    pub image: ImageId,
    pub instance_type: String,
    #[serde(default)]
    pub spot_bid: Option<f64>,
    /// Launch the leader on demand even when a spot bid is given.
    #[serde(default)]
    pub leader_on_demand: bool,
    #[serde(default)]
    pub ebs_volume_size: Option<u32>,
    #[serde(default)]
    pub cluster_name: Option<ClusterName>,
    #[serde(default)]
    pub options: BindingOptions,
}

impl CreationArgs {
    pub fn new(image: impl Into<String>, instance_type: impl Into<String>) -> Self {
        Self {
            image: ImageId::new(image),
            instance_type: instance_type.into(),
            spot_bid: None,
            leader_on_demand: false,
            ebs_volume_size: None,
            cluster_name: None,
            options: BindingOptions::new(),
        }
    }
}

/// Cluster position of a node, with the state that position needs.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Standalone,
    Leader { creation: Option<CreationArgs> },
    Worker { leader_instance_id: Option<InstanceId> },
}

/// Where a node is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Constructed from a role, not yet associated with an instance.
    Unbound,
    /// Associated with an existing or freshly created instance.
    Bound,
    /// Instance confirmed running.
    Provisioned,
}

/// A compute instance in a cluster, or about to become one.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    role: Role,
    kind: NodeKind,
    state: NodeState,
    instance_id: Option<InstanceId>,
    ordinal: Option<u32>,
    binding_options: BindingOptions,
    image_id: Option<ImageId>,
    private_ip: Option<String>,
    public_ip: Option<String>,
}

impl Node {
    /// Construct an unbound node performing `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        let kind = match role.kind() {
            RoleKind::Standalone => NodeKind::Standalone,
            RoleKind::Leader => NodeKind::Leader { creation: None },
            RoleKind::Worker => NodeKind::Worker {
                leader_instance_id: None,
            },
        };
        Self {
            role,
            kind,
            state: NodeState::Unbound,
            instance_id: None,
            ordinal: None,
            binding_options: BindingOptions::new(),
            image_id: None,
            private_ip: None,
            public_ip: None,
        }
    }

    #[must_use]
    pub const fn role(&self) -> &Role {
        &self.role
    }

    #[must_use]
    pub const fn role_name(&self) -> &RoleName {
        self.role.name()
    }

    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    pub const fn binding_options(&self) -> &BindingOptions {
        &self.binding_options
    }

    #[must_use]
    pub const fn image_id(&self) -> Option<&ImageId> {
        self.image_id.as_ref()
    }

    #[must_use]
    pub fn private_ip(&self) -> Option<&str> {
        self.private_ip.as_deref()
    }

    #[must_use]
    pub fn public_ip(&self) -> Option<&str> {
        self.public_ip.as_deref()
    }

    /// Turn creation arguments into a launch specification.
    ///
    /// Leaders remember `args` for cloning workers later. Workers must find
    /// their leader's instance ID among the options.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::MissingLeaderBinding`] for a worker without a
    /// leader, or a JSON error if the options can't be rendered.
    pub fn prepare(&mut self, args: CreationArgs) -> Result<InstanceSpec> {
        let mut options = args.options.clone();
        if let Some(size) = args.ebs_volume_size {
            options.insert(OPT_EBS_VOLUME_SIZE.into(), size.to_string());
        }
        if let Some(name) = &args.cluster_name {
            options.insert(TAG_CLUSTER_NAME.into(), name.to_string());
        }

        let mut spot_bid = args.spot_bid;
        match &mut self.kind {
            NodeKind::Standalone => {}
            NodeKind::Leader { creation } => {
                if args.leader_on_demand {
                    spot_bid = None;
                }
                *creation = Some(args.clone());
            }
            NodeKind::Worker { leader_instance_id } => {
                let leader = options.get(TAG_LEADER_INSTANCE_ID).ok_or_else(|| {
                    ClusterError::MissingLeaderBinding {
                        role: self.role.name().to_string(),
                    }
                })?;
                *leader_instance_id = Some(InstanceId::new(leader.as_str()));
            }
        }
        self.binding_options = options;

        Ok(InstanceSpec {
            role: self.role.name().clone(),
            image: args.image,
            instance_type: args.instance_type,
            tags: self.binding_options.clone(),
            user_data: serde_json::to_string(&self.binding_options)?,
            spot_bid,
        })
    }

    /// Associate a freshly created instance with this node.
    ///
    /// The instance carries no ordinal tag yet, so the caller assigns it.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::AlreadyBound`] if the node is bound to a
    /// different instance.
    pub fn bind_created(&mut self, instance: &Instance, ordinal: u32) -> Result<()> {
        self.attach(instance, ordinal)?;
        Ok(())
    }

    /// Record that the bound instance is up and running.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Unbound`] if the node isn't bound, or
    /// [`ClusterError::AlreadyBound`] if `instance` is a different one.
    pub fn mark_provisioned(&mut self, instance: &Instance) -> Result<()> {
        let id = self.require_instance_id()?;
        if id != &instance.id {
            return Err(ClusterError::AlreadyBound {
                role: self.role.name().to_string(),
                instance_id: id.clone(),
            }
            .into());
        }
        self.private_ip.clone_from(&instance.private_ip);
        self.public_ip.clone_from(&instance.public_ip);
        self.state = NodeState::Provisioned;
        Ok(())
    }

    /// Tags to persist on this node's instance.
    #[must_use]
    pub fn instance_tags(&self, namespace: &Namespace) -> Tags {
        let mut tags = self.binding_options.clone();
        tags.insert(TAG_NAME.into(), namespace.qualify(self.role.name()));
        if let Some(ordinal) = self.ordinal {
            tags.insert(TAG_CLUSTER_ORDINAL.into(), ordinal.to_string());
        }
        if let NodeKind::Worker {
            leader_instance_id: Some(leader),
        } = &self.kind
        {
            tags.insert(TAG_LEADER_INSTANCE_ID.into(), leader.to_string());
        }
        tags
    }

    fn attach(&mut self, instance: &Instance, ordinal: u32) -> std::result::Result<(), ClusterError> {
        if let Some(existing) = &self.instance_id {
            if existing != &instance.id {
                return Err(ClusterError::AlreadyBound {
                    role: self.role.name().to_string(),
                    instance_id: existing.clone(),
                });
            }
        }
        self.instance_id = Some(instance.id.clone());
        self.ordinal = Some(ordinal);
        self.image_id = Some(instance.image_id.clone());
        self.private_ip.clone_from(&instance.private_ip);
        self.public_ip.clone_from(&instance.public_ip);
        if self.state == NodeState::Unbound {
            self.state = NodeState::Bound;
        }
        Ok(())
    }
}

/// Association of an in-memory node with a cloud instance.
pub trait Bindable {
    fn instance_id(&self) -> Option<&InstanceId>;

    fn state(&self) -> NodeState;

    /// Adopt an existing instance, reading ordinal and options from its tags.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::AlreadyBound`] if bound to a different instance.
    fn bind(&mut self, instance: &Instance) -> std::result::Result<(), ClusterError>;

    /// The bound instance ID.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Unbound`] if no instance is bound.
    fn require_instance_id(&self) -> std::result::Result<&InstanceId, ClusterError>;
}

/// Membership in a leader/worker cluster.
pub trait Clusterable {
    /// Position within the cluster; the leader is `0`.
    fn cluster_ordinal(&self) -> Option<u32>;

    /// Role whose image this node boots from.
    fn image_role(&self) -> &RoleName;

    /// Explicit cluster name, or the leader's instance ID.
    fn cluster_name(&self) -> Option<ClusterName>;
}

/// A node that leads a cluster.
pub trait Leader: Bindable + Clusterable {
    /// Arguments this leader was created with; `None` if it was bound.
    fn creation_args(&self) -> Option<&CreationArgs>;

    /// Derive creation arguments for this leader's workers.
    ///
    /// Copies the leader's own arguments, overrides the instance type if
    /// requested and points the workers at this leader.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::LeaderNotPrepared`] if the leader was not
    /// created in this process, or [`ClusterError::Unbound`] if its instance
    /// ID isn't known yet.
    fn worker_args(
        &self,
        worker_instance_type: Option<&str>,
    ) -> std::result::Result<CreationArgs, ClusterError> {
        let instance_id = self.require_instance_id()?.clone();
        let mut args = self
            .creation_args()
            .cloned()
            .ok_or_else(|| ClusterError::LeaderNotPrepared {
                role: self.image_role().to_string(),
            })?;
        if let Some(instance_type) = worker_instance_type {
            args.instance_type = instance_type.to_string();
        }
        args.cluster_name = self.cluster_name();
        args.options
            .insert(TAG_LEADER_INSTANCE_ID.into(), instance_id.to_string());
        Ok(args)
    }
}

/// A node that works for a leader.
pub trait Worker: Bindable + Clusterable {
    fn leader_instance_id(&self) -> Option<&InstanceId>;
}

impl Bindable for Node {
    fn instance_id(&self) -> Option<&InstanceId> {
        self.instance_id.as_ref()
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn bind(&mut self, instance: &Instance) -> std::result::Result<(), ClusterError> {
        self.attach(instance, instance.cluster_ordinal())?;
        self.binding_options = instance
            .tags
            .iter()
            .filter(|(key, _)| key.as_str() != TAG_NAME && key.as_str() != TAG_CLUSTER_ORDINAL)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let NodeKind::Worker { leader_instance_id } = &mut self.kind {
            *leader_instance_id = instance.tag(TAG_LEADER_INSTANCE_ID).map(InstanceId::new);
        }
        Ok(())
    }

    fn require_instance_id(&self) -> std::result::Result<&InstanceId, ClusterError> {
        self.instance_id.as_ref().ok_or_else(|| ClusterError::Unbound {
            role: self.role.name().to_string(),
        })
    }
}

impl Clusterable for Node {
    fn cluster_ordinal(&self) -> Option<u32> {
        self.ordinal
    }

    fn image_role(&self) -> &RoleName {
        self.role.image_role()
    }

    fn cluster_name(&self) -> Option<ClusterName> {
        match self.binding_options.get(TAG_CLUSTER_NAME) {
            Some(name) => Some(ClusterName::new(name.as_str())),
            None => match &self.kind {
                NodeKind::Worker {
                    leader_instance_id: Some(leader),
                } => Some(ClusterName::from(leader)),
                _ => self.instance_id.as_ref().map(ClusterName::from),
            },
        }
    }
}

impl Leader for Node {
    fn creation_args(&self) -> Option<&CreationArgs> {
        match &self.kind {
            NodeKind::Leader { creation } => creation.as_ref(),
            _ => None,
        }
    }
}

impl Worker for Node {
    fn leader_instance_id(&self) -> Option<&InstanceId> {
        match &self.kind {
            NodeKind::Worker { leader_instance_id } => leader_instance_id.as_ref(),
            _ => None,
        }
    }
}
