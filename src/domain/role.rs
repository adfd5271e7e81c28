//! Node roles.
//!
//! A role names what a node does and declares, statically, the image role it
//! provisions from. Leader and worker roles of one cluster type share an image
//! role so that both boot from the same image and land in the same security
//! group.

use std::collections::BTreeSet;

use super::id::RoleName;
use super::package::{PackageResolver, SubstitutionGraph, VisitedScope};
use crate::error::PackageError;

/// Position a role takes in a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Standalone,
    Leader,
    Worker,
}

/// A node role.
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    name: RoleName,
    image_role: RoleName,
    kind: RoleKind,
    profile: ProvisioningProfile,
}

impl Role {
    /// A role outside any cluster; it provisions from its own image.
    pub fn standalone(name: impl Into<String>) -> Self {
        let name = RoleName::new(name);
        Self {
            image_role: name.clone(),
            name,
            kind: RoleKind::Standalone,
            profile: ProvisioningProfile::default(),
        }
    }

    pub fn leader(name: impl Into<String>, image_role: impl Into<String>) -> Self {
        Self {
            name: RoleName::new(name),
            image_role: RoleName::new(image_role),
            kind: RoleKind::Leader,
            profile: ProvisioningProfile::default(),
        }
    }

    pub fn worker(name: impl Into<String>, image_role: impl Into<String>) -> Self {
        Self {
            name: RoleName::new(name),
            image_role: RoleName::new(image_role),
            kind: RoleKind::Worker,
            profile: ProvisioningProfile::default(),
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: ProvisioningProfile) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub const fn name(&self) -> &RoleName {
        &self.name
    }

    #[must_use]
    pub const fn image_role(&self) -> &RoleName {
        &self.image_role
    }

    #[must_use]
    pub const fn kind(&self) -> RoleKind {
        self.kind
    }

    #[must_use]
    pub const fn profile(&self) -> &ProvisioningProfile {
        &self.profile
    }

    /// Prefix of the names of images created from nodes of this role.
    #[must_use]
    pub fn image_name_prefix(&self) -> &str {
        self.image_role.as_str()
    }

    /// Security group shared by every role with the same image role.
    #[must_use]
    pub fn security_group_name(&self) -> &str {
        self.image_role.as_str()
    }
}

/// The software a role installs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisioningProfile {
    packages: Vec<String>,
    substitutions: SubstitutionGraph,
    scope: VisitedScope,
}

impl ProvisioningProfile {
    pub fn new<I, S>(packages: I, substitutions: SubstitutionGraph) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
            substitutions,
            scope: VisitedScope::default(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: VisitedScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    /// Concrete package names to hand to the package manager.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError::InvalidPackageName`] if a requested name is
    /// malformed.
    pub fn install_list(&self) -> Result<BTreeSet<String>, PackageError> {
        PackageResolver::new(&self.substitutions)
            .with_scope(self.scope)
            .resolve(&self.packages)
    }
}
