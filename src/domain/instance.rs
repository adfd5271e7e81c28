//! Cloud instance records as seen through the provider port.
//!
//! Tags are the only durable bookkeeping this crate owns: role, cluster
//! ordinal and leader instance ID are all written to and read back from the
//! instance's tags.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ImageId, InstanceId, RoleName};

/// Key/value tags attached to a cloud resource.
pub type Tags = BTreeMap<String, String>;

/// Tag holding the namespace-qualified role name.
pub const TAG_NAME: &str = "Name";
/// Tag holding a node's position within its cluster.
pub const TAG_CLUSTER_ORDINAL: &str = "cluster_ordinal";
/// Tag on workers pointing at their leader.
pub const TAG_LEADER_INSTANCE_ID: &str = "leader_instance_id";
/// Tag holding the cluster name.
pub const TAG_CLUSTER_NAME: &str = "cluster_name";
/// Filter key selecting a single instance by ID in `find_instance`.
pub const FILTER_INSTANCE_ID: &str = "instance-id";

/// Lifecycle state of a cloud instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Stopping,
    Stopped,
    Terminated,
}

impl InstanceState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider-side instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub image_id: ImageId,
    pub state: InstanceState,
    pub launch_time: DateTime<Utc>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
}

impl Instance {
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Cluster ordinal recorded in the tags, `0` if absent or malformed.
    #[must_use]
    pub fn cluster_ordinal(&self) -> u32 {
        self.tag(TAG_CLUSTER_ORDINAL)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self.state, InstanceState::Terminated)
    }
}

/// Everything the provider needs to launch instances for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub role: RoleName,
    pub image: ImageId,
    pub instance_type: String,
    #[serde(default)]
    pub tags: Tags,
    /// Payload handed to the instance at boot.
    #[serde(default)]
    pub user_data: String,
    /// Maximum spot price; `None` requests on-demand capacity.
    #[serde(default)]
    pub spot_bid: Option<f64>,
}

/// Sort key used to order instances of one role deterministically.
pub(crate) fn launch_order(a: &Instance, b: &Instance) -> std::cmp::Ordering {
    a.launch_time
        .cmp(&b.launch_time)
        .then_with(|| a.id.cmp(&b.id))
}
