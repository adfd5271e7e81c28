use std::sync::Arc;

use fleetwright::application::{Cluster, ConcurrencyPool, NodeService};
use fleetwright::domain::instance::{TAG_CLUSTER_ORDINAL, TAG_LEADER_INSTANCE_ID};
use fleetwright::domain::{Instance, InstanceState, Tags};
use fleetwright::infrastructure::config::Config;
use fleetwright::port::CloudProvider;
use fleetwright::testkit;
use fleetwright::testkit::cloud::MemoryCloud;

pub const LEADER: &str = "spark-master";
pub const WORKER: &str = "spark-slave";

/// A cluster wired to an in-memory cloud with fast test settings.
pub struct Fleet {
    pub cloud: Arc<MemoryCloud>,
    pub nodes: Arc<NodeService>,
    pub cluster: Cluster,
    pub config: Config,
}

impl Fleet {
    pub fn new() -> Self {
        Self::with_cloud(MemoryCloud::new())
    }

    pub fn with_cloud(cloud: MemoryCloud) -> Self {
        Self::with_config(cloud, testkit::config::config())
    }

    pub fn with_config(cloud: MemoryCloud, config: Config) -> Self {
        let cloud = Arc::new(cloud);
        let provider: Arc<dyn CloudProvider> = cloud.clone();
        let nodes = Arc::new(NodeService::new(provider, &config));
        let cluster = Cluster::new(
            Arc::clone(&nodes),
            ConcurrencyPool::new(config.pool.clone()),
            testkit::domain::leader_role(),
            testkit::domain::worker_role(),
        );
        Self {
            cloud,
            nodes,
            cluster,
            config,
        }
    }

    /// Instance name of `role` under the test namespace.
    pub fn name_of(&self, role: &str) -> String {
        format!("{}{role}", self.config.cluster.namespace)
    }

    /// Seed a running leader.
    pub fn seed_leader(&self) -> Instance {
        let tags = Tags::from([(TAG_CLUSTER_ORDINAL.to_string(), "0".to_string())]);
        self.cloud
            .seed(&self.name_of(LEADER), InstanceState::Running, tags)
    }

    /// Seed a worker of `leader` at `ordinal`.
    pub fn seed_worker(&self, leader: &Instance, ordinal: u32, state: InstanceState) -> Instance {
        let tags = Tags::from([
            (TAG_CLUSTER_ORDINAL.to_string(), ordinal.to_string()),
            (TAG_LEADER_INSTANCE_ID.to_string(), leader.id.to_string()),
        ]);
        self.cloud.seed(&self.name_of(WORKER), state, tags)
    }

    pub fn state_of(&self, instance: &Instance) -> Option<InstanceState> {
        self.cloud.instance(&instance.id).map(|i| i.state)
    }
}
