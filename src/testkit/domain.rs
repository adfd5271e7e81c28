//! Builders for domain primitives used across tests.
//!
//! Roles mirror a typical leader/worker stack sharing one image role.

use crate::domain::id::InstanceId;
use crate::domain::node::CreationArgs;
use crate::domain::role::Role;

/// Image role shared by [`leader_role`] and [`worker_role`].
pub const IMAGE_ROLE: &str = "spark-box";

pub fn leader_role() -> Role {
    Role::leader("spark-master", IMAGE_ROLE)
}

pub fn worker_role() -> Role {
    Role::worker("spark-slave", IMAGE_ROLE)
}

/// Creation arguments for a small on-demand leader.
pub fn creation_args() -> CreationArgs {
    CreationArgs::new("ami-spark-box", "m3.large")
}

/// Create an [`InstanceId`] from a string.
pub fn instance_id(id: &str) -> InstanceId {
    InstanceId::new(id)
}
