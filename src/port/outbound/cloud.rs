//! Cloud provider port.
//!
//! The orchestration core depends on this capability set only; any provider
//! client satisfying it is usable. Every call may fail with a transient or a
//! permanent [`CloudError`].

use async_trait::async_trait;

use crate::domain::id::{ImageId, InstanceId, RoleName};
use crate::domain::instance::{Instance, InstanceSpec, InstanceState, Tags};
use crate::error::CloudError;

/// Control-plane operations on compute instances.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Find a single instance performing `role` whose tags match `filter`.
    ///
    /// `role` is the namespace-qualified name, matched against the
    /// [`TAG_NAME`](crate::domain::instance::TAG_NAME) tag.
    ///
    /// The filter key [`FILTER_INSTANCE_ID`](crate::domain::instance::FILTER_INSTANCE_ID)
    /// selects by instance ID. Returns `Ok(None)` if nothing matches.
    async fn find_instance(
        &self,
        role: &RoleName,
        filter: &Tags,
    ) -> Result<Option<Instance>, CloudError>;

    /// Launch exactly `count` instances from one specification.
    async fn create_instances(
        &self,
        spec: &InstanceSpec,
        count: usize,
    ) -> Result<Vec<Instance>, CloudError>;

    /// List every instance carrying the tag `tag_key = tag_value`.
    async fn list_instances(
        &self,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Vec<Instance>, CloudError>;

    /// Fetch an instance's current state and addresses.
    async fn describe_instance(&self, instance_id: &InstanceId) -> Result<Instance, CloudError>;

    /// Current lifecycle state, used for readiness polling.
    async fn describe_instance_state(
        &self,
        instance_id: &InstanceId,
    ) -> Result<InstanceState, CloudError> {
        Ok(self.describe_instance(instance_id).await?.state)
    }

    /// Attach tags to an instance.
    async fn tag_instance(&self, instance_id: &InstanceId, tags: &Tags) -> Result<(), CloudError>;

    async fn start_instance(&self, instance_id: &InstanceId) -> Result<(), CloudError>;

    async fn stop_instance(&self, instance_id: &InstanceId) -> Result<(), CloudError>;

    /// Request termination; the provider reclaims the instance asynchronously.
    async fn terminate_instance(&self, instance_id: &InstanceId) -> Result<(), CloudError>;

    /// Snapshot an instance into a new image.
    async fn create_image(&self, instance_id: &InstanceId) -> Result<ImageId, CloudError>;

    /// Provider name for logging/debugging.
    fn provider_name(&self) -> &'static str;
}
