//! Provider-agnostic domain types: nodes, roles, instances and package
//! substitution.

pub mod id;
pub mod instance;
pub mod node;
pub mod ordinal;
pub mod package;
pub mod role;

pub use id::{ClusterName, ImageId, InstanceId, Namespace, RoleName};
pub use instance::{Instance, InstanceSpec, InstanceState, Tags};
pub use node::{
    Bindable, BindingOptions, Clusterable, CreationArgs, Leader, Node, NodeKind, NodeState, Worker,
};
pub use ordinal::allocate_cluster_ordinals;
pub use package::{PackageResolver, Substitute, SubstitutionGraph, VisitedScope};
pub use role::{ProvisioningProfile, Role, RoleKind};
