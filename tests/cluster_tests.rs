//! Integration tests for cluster coordination.
//!
//! Every test runs against `MemoryCloud` with millisecond retry delays and a
//! 200ms readiness timeout.

mod support;

use std::collections::BTreeSet;

use fleetwright::application::{ApplyOptions, ClusterLeader, Selector};
use fleetwright::domain::instance::{TAG_CLUSTER_NAME, TAG_LEADER_INSTANCE_ID, TAG_NAME};
use fleetwright::domain::{Bindable, Clusterable, InstanceState, NodeState, Tags, Worker};
use fleetwright::error::{CloudError, ClusterError, Error};
use fleetwright::testkit;
use fleetwright::testkit::cloud::{Boot, Call, MemoryCloud};

use support::fleet::{Fleet, LEADER, WORKER};
use support::recording::Recorder;

// ---------------------------------------------------------------------------
// Creation and cloning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_launches_leader_then_ready_workers() {
    let fleet = Fleet::new();

    let (leader, workers) = fleet
        .cluster
        .create(testkit::domain::creation_args(), 3, Some("m3.xlarge"), None)
        .await
        .unwrap();

    let leader_id = leader.instance_id().unwrap().clone();
    assert_eq!(leader.state(), NodeState::Provisioned);
    assert_eq!(leader.cluster_ordinal(), Some(0));
    assert_eq!(workers.len(), 3);
    let ordinals: Vec<_> = workers.iter().map(|w| w.cluster_ordinal()).collect();
    assert_eq!(ordinals, [Some(1), Some(2), Some(3)]);
    for worker in &workers {
        assert_eq!(worker.state(), NodeState::Provisioned);
        assert_eq!(worker.leader_instance_id(), Some(&leader_id));
        assert_eq!(worker.cluster_name().unwrap().as_str(), leader_id.as_str());
    }

    // One launch request for the leader and one for all workers.
    assert_eq!(fleet.cloud.calls(Call::CreateInstances), 2);

    let tagged = fleet.cloud.instance(workers[0].instance_id().unwrap()).unwrap();
    assert_eq!(tagged.tag(TAG_NAME), Some(fleet.name_of(WORKER).as_str()));
    assert_eq!(tagged.tag(TAG_LEADER_INSTANCE_ID), Some(leader_id.as_str()));
    assert_eq!(tagged.tag(TAG_CLUSTER_NAME), Some(leader_id.as_str()));
}

#[tokio::test]
async fn clone_names_the_worker_that_never_became_ready() {
    let cloud = MemoryCloud::new().with_boot_plan(vec![
        Boot::default(),
        Boot::RunningAfter(1),
        Boot::StuckPending,
        Boot::RunningAfter(1),
    ]);
    let fleet = Fleet::with_cloud(cloud);
    let (leader, _) = fleet
        .cluster
        .create(testkit::domain::creation_args(), 0, None, None)
        .await
        .unwrap();
    let pool = fleetwright::application::ConcurrencyPool::new(fleet.config.pool.clone());
    let leader = ClusterLeader::new(leader, fleet.nodes.clone(), pool);

    let err = leader
        .clone(&testkit::domain::worker_role(), 3, None)
        .await
        .unwrap_err();

    // Launch order: leader, then the three workers.
    let launched: Vec<_> = fleet.cloud.instances().into_iter().map(|i| i.id).collect();
    assert_eq!(launched.len(), 4);
    let stuck = &launched[2];
    match err {
        Error::Cluster(ClusterError::PartialBatchFailure { node, source }) => {
            assert_eq!(&node, stuck);
            assert!(matches!(
                *source,
                Error::Cluster(ClusterError::ReadinessTimeout { .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }

    let running: BTreeSet<_> = fleet.cloud.observed_running().into_iter().collect();
    let expected: BTreeSet<_> = [&launched[0], &launched[1], &launched[3]]
        .into_iter()
        .cloned()
        .collect();
    assert_eq!(running, expected);
    assert_eq!(fleet.cloud.calls(Call::CreateInstances), 2);
}

#[tokio::test]
async fn clone_of_zero_workers_launches_nothing() {
    let fleet = Fleet::new();
    let (leader, workers) = fleet
        .cluster
        .create(testkit::domain::creation_args(), 0, None, None)
        .await
        .unwrap();
    assert!(workers.is_empty());
    assert!(leader.instance_id().is_some());
    assert_eq!(fleet.cloud.calls(Call::CreateInstances), 1);
}

#[tokio::test]
async fn bound_leader_cannot_clone() {
    let fleet = Fleet::new();
    fleet.seed_leader();
    let leader = fleet
        .cluster
        .locate_leader(&Selector::default())
        .await
        .unwrap();
    let pool = fleetwright::application::ConcurrencyPool::new(fleet.config.pool.clone());
    let leader = ClusterLeader::new(leader, fleet.nodes.clone(), pool);

    let err = leader
        .clone(&testkit::domain::worker_role(), 2, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Cluster(ClusterError::LeaderNotPrepared { .. })
    ));
    assert_eq!(fleet.cloud.calls(Call::CreateInstances), 0);
}

#[tokio::test]
async fn short_launch_is_reported() {
    let fleet = Fleet::with_cloud(MemoryCloud::new().with_shortfall(1));
    let err = fleet
        .cluster
        .create(testkit::domain::creation_args(), 2, None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Cluster(ClusterError::CreationShortfall {
            requested: 1,
            created: 0
        })
    ));
}

#[tokio::test]
async fn launch_retries_while_security_group_propagates() {
    let fleet = Fleet::new();
    fleet.cloud.fail_next(
        Call::CreateInstances,
        CloudError::permanent("InvalidGroup.NotFound", "The security group 'spark-box' does not exist"),
    );
    fleet.cloud.fail_next(
        Call::CreateInstances,
        CloudError::permanent(
            "InvalidParameterValue",
            "Value (spark-box) for parameter iamInstanceProfile.name is invalid. Invalid IAM Instance Profile name",
        ),
    );

    fleet
        .cluster
        .create(testkit::domain::creation_args(), 0, None, None)
        .await
        .unwrap();
    assert_eq!(fleet.cloud.calls(Call::CreateInstances), 3);
}

#[tokio::test]
async fn launch_gives_up_on_permanent_error() {
    let fleet = Fleet::new();
    fleet.cloud.fail_next(
        Call::CreateInstances,
        CloudError::permanent("InvalidAMIID.Malformed", "Invalid id: \"ami-spark-box\""),
    );
    let err = fleet
        .cluster
        .create(testkit::domain::creation_args(), 1, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cloud(ref e) if e.code() == "InvalidAMIID.Malformed"));
    assert_eq!(fleet.cloud.calls(Call::CreateInstances), 1);
}

// ---------------------------------------------------------------------------
// Locating the leader
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_leader_fails_before_touching_workers() {
    let fleet = Fleet::new();
    let recorder = Recorder::new();

    let err = fleet
        .cluster
        .apply(recorder.operation(), ApplyOptions::leader_first())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cluster(ClusterError::NoSuchLeader { .. })));
    assert!(recorder.visited().is_empty());
    // Only the leader lookup reached the provider.
    assert_eq!(fleet.cloud.calls(Call::ListInstances), 1);
    assert_eq!(fleet.cloud.total_calls(), 1);
}

#[tokio::test]
async fn several_leaders_need_an_ordinal() {
    let fleet = Fleet::new();
    fleet.seed_leader();
    let newest = fleet.seed_leader();

    let err = fleet
        .cluster
        .locate_leader(&Selector::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Cluster(ClusterError::AmbiguousLeader { count: 2, .. })
    ));

    let leader = fleet
        .cluster
        .locate_leader(&Selector::default().with_ordinal(-1))
        .await
        .unwrap();
    assert_eq!(leader.instance_id(), Some(&newest.id));

    let err = fleet
        .cluster
        .locate_leader(&Selector::default().with_ordinal(2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Cluster(ClusterError::NoSuchOrdinal { ordinal: 2, .. })
    ));
}

#[tokio::test]
async fn cluster_name_narrows_the_leader_search() {
    let fleet = Fleet::new();
    let unnamed = fleet.seed_leader();
    let named = fleet.cloud.seed(
        &fleet.name_of(LEADER),
        InstanceState::Running,
        Tags::from([(TAG_CLUSTER_NAME.to_string(), "alpha".to_string())]),
    );

    let leader = fleet
        .cluster
        .locate_leader(&Selector::cluster("alpha"))
        .await
        .unwrap();
    assert_eq!(leader.instance_id(), Some(&named.id));

    // Without a cluster name tag an instance's cluster is named after itself.
    let leader = fleet
        .cluster
        .locate_leader(&Selector::cluster(unnamed.id.as_str()))
        .await
        .unwrap();
    assert_eq!(leader.instance_id(), Some(&unnamed.id));
}

#[tokio::test]
async fn terminated_leaders_are_ignored() {
    let fleet = Fleet::new();
    let live = fleet.seed_leader();
    fleet
        .cloud
        .seed(&fleet.name_of(LEADER), InstanceState::Terminated, Tags::new());
    let found = fleet
        .cluster
        .locate_leader(&Selector::default())
        .await
        .unwrap();
    assert_eq!(found.instance_id(), Some(&live.id));
}

#[tokio::test]
async fn transient_lookup_failures_are_retried() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    fleet.cloud.fail_next(
        Call::ListInstances,
        CloudError::transient("RequestLimitExceeded", "Request limit exceeded."),
    );

    let found = fleet
        .cluster
        .locate_leader(&Selector::default())
        .await
        .unwrap();
    assert_eq!(found.instance_id(), Some(&leader.id));
    assert_eq!(fleet.cloud.calls(Call::ListInstances), 2);
}

// ---------------------------------------------------------------------------
// Applying operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn leader_first_runs_leader_before_workers() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    let w1 = fleet.seed_worker(&leader, 1, InstanceState::Running);
    let w2 = fleet.seed_worker(&leader, 2, InstanceState::Running);
    let recorder = Recorder::new();

    fleet
        .cluster
        .apply(recorder.operation(), ApplyOptions::leader_first().with_pool_size(1))
        .await
        .unwrap();

    assert_eq!(recorder.visited(), [leader.id, w1.id, w2.id]);
}

#[tokio::test]
async fn workers_first_runs_leader_last() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    let w1 = fleet.seed_worker(&leader, 1, InstanceState::Running);
    let w2 = fleet.seed_worker(&leader, 2, InstanceState::Running);
    let recorder = Recorder::new();

    fleet
        .cluster
        .apply(recorder.operation(), ApplyOptions::workers_first().with_pool_size(1))
        .await
        .unwrap();

    assert_eq!(recorder.visited(), [w1.id, w2.id, leader.id]);
}

#[tokio::test]
async fn parallel_apply_visits_every_worker_once() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    let workers: BTreeSet<_> = (1..=8)
        .map(|ordinal| fleet.seed_worker(&leader, ordinal, InstanceState::Running).id)
        .collect();
    let recorder = Recorder::new();

    fleet
        .cluster
        .apply(recorder.operation(), ApplyOptions::leader_first().with_pool_size(4))
        .await
        .unwrap();

    let visited = recorder.visited();
    assert_eq!(visited.len(), 9);
    assert_eq!(visited[0], leader.id);
    let seen: BTreeSet<_> = visited[1..].iter().cloned().collect();
    assert_eq!(seen, workers);
}

#[tokio::test]
async fn worker_failure_is_attributed_and_spares_the_leader() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    fleet.seed_worker(&leader, 1, InstanceState::Running);
    let bad = fleet.seed_worker(&leader, 2, InstanceState::Running);
    let recorder = Recorder::new();

    let err = fleet
        .cluster
        .apply(
            recorder.failing_on(bad.id.clone()),
            ApplyOptions::workers_first().with_pool_size(1),
        )
        .await
        .unwrap_err();

    match err {
        Error::Cluster(ClusterError::PartialBatchFailure { node, .. }) => assert_eq!(node, bad.id),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!recorder.visited().contains(&leader.id));
}

#[tokio::test]
async fn workers_of_other_leaders_are_left_alone() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    let mine = fleet.seed_worker(&leader, 1, InstanceState::Running);
    let other = fleet.cloud.seed(
        &fleet.name_of(LEADER),
        InstanceState::Running,
        Tags::from([(TAG_CLUSTER_NAME.to_string(), "other".to_string())]),
    );
    fleet.seed_worker(&other, 1, InstanceState::Running);
    fleet.seed_worker(&leader, 2, InstanceState::Terminated);
    let recorder = Recorder::new();

    fleet
        .cluster
        .apply(
            recorder.operation(),
            ApplyOptions::leader_first().with_selector(Selector::cluster(leader.id.as_str())),
        )
        .await
        .unwrap();

    assert_eq!(recorder.visited(), [leader.id, mine.id]);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_then_start_cluster() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    let workers: Vec<_> = (1..=3)
        .map(|ordinal| fleet.seed_worker(&leader, ordinal, InstanceState::Running))
        .collect();

    fleet.cluster.stop(Selector::default(), None).await.unwrap();
    assert_eq!(fleet.state_of(&leader), Some(InstanceState::Stopped));
    for worker in &workers {
        assert_eq!(fleet.state_of(worker), Some(InstanceState::Stopped));
    }

    fleet.cluster.start(Selector::default(), None).await.unwrap();
    assert_eq!(fleet.state_of(&leader), Some(InstanceState::Running));
    for worker in &workers {
        assert_eq!(fleet.state_of(worker), Some(InstanceState::Running));
    }
}

#[tokio::test]
async fn starting_a_running_cluster_fails_on_the_leader() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    fleet.seed_worker(&leader, 1, InstanceState::Stopped);

    let err = fleet
        .cluster
        .start(Selector::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Cluster(ClusterError::UnexpectedState {
            expected: InstanceState::Stopped,
            actual: InstanceState::Running,
            ..
        })
    ));
    assert_eq!(fleet.cloud.calls(Call::StartInstance), 0);
}

#[tokio::test]
async fn terminate_and_wait_removes_the_cluster() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    let worker = fleet.seed_worker(&leader, 1, InstanceState::Stopped);

    fleet
        .cluster
        .terminate(Selector::default(), None, true)
        .await
        .unwrap();

    assert_eq!(fleet.state_of(&leader), Some(InstanceState::Terminated));
    assert_eq!(fleet.state_of(&worker), Some(InstanceState::Terminated));
    let err = fleet
        .cluster
        .locate_leader(&Selector::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cluster(ClusterError::NoSuchLeader { .. })));
}

#[tokio::test]
async fn image_from_leader() {
    let fleet = Fleet::new();
    fleet.seed_leader();
    let leader = fleet
        .cluster
        .locate_leader(&Selector::default())
        .await
        .unwrap();

    let image = fleet.nodes.create_image(&leader).await.unwrap();
    assert!(image.as_str().starts_with("ami-"));
    assert_eq!(fleet.cloud.calls(Call::CreateImage), 1);
}

#[tokio::test]
async fn rebind_to_unknown_instance_fails() {
    let fleet = Fleet::new();
    let mut worker = fleetwright::domain::Node::new(testkit::domain::worker_role());
    let err = fleet
        .nodes
        .rebind(&mut worker, &testkit::domain::instance_id("i-0000000missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cluster(ClusterError::NoSuchInstance { .. })));
    assert!(fleet.cloud.calls(Call::FindInstance) > 1);
    assert!(worker.instance_id().is_none());
}

// ---------------------------------------------------------------------------
// Growing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn grow_fills_ordinal_gaps() {
    let fleet = Fleet::new();
    let leader = fleet.seed_leader();
    fleet.seed_worker(&leader, 1, InstanceState::Running);
    fleet.seed_worker(&leader, 3, InstanceState::Running);

    let report = fleet
        .cluster
        .grow(&Selector::default(), 2, testkit::domain::creation_args(), None)
        .await
        .unwrap();

    assert!(report.is_complete());
    let ordinals: Vec<_> = report.ready.iter().map(|w| w.cluster_ordinal()).collect();
    assert_eq!(ordinals, [Some(2), Some(4)]);
    for worker in &report.ready {
        assert_eq!(worker.leader_instance_id(), Some(&leader.id));
        let instance = fleet.cloud.instance(worker.instance_id().unwrap()).unwrap();
        assert_eq!(instance.tag(TAG_CLUSTER_NAME), Some(leader.id.as_str()));
    }
    let workers = fleet
        .nodes
        .list_workers(testkit::domain::worker_role().name(), &leader.id)
        .await
        .unwrap();
    assert_eq!(workers.len(), 4);
}

#[tokio::test]
async fn grow_reports_workers_that_fail_to_boot() {
    let cloud = MemoryCloud::new().with_boot_plan(vec![
        Boot::StuckPending,
        Boot::RunningAfter(1),
        Boot::Becomes(InstanceState::Terminated),
    ]);
    let fleet = Fleet::with_cloud(cloud);
    let leader = fleet.seed_leader();

    let report = fleet
        .cluster
        .grow(&Selector::default(), 3, testkit::domain::creation_args(), Some(3))
        .await
        .unwrap();

    let launched: Vec<_> = fleet
        .cloud
        .instances()
        .into_iter()
        .map(|i| i.id)
        .filter(|id| *id != leader.id)
        .collect();
    assert!(!report.is_complete());
    assert_eq!(report.ready.len(), 1);
    assert_eq!(report.ready[0].instance_id(), Some(&launched[1]));

    let mut failed: Vec<_> = report.failed.iter().map(|(id, _)| id.clone()).collect();
    failed.sort();
    assert_eq!(failed, [launched[0].clone(), launched[2].clone()]);
    assert!(report.failed.iter().any(|(_, err)| matches!(
        err,
        Error::Cluster(ClusterError::UnexpectedState {
            actual: InstanceState::Terminated,
            ..
        })
    )));
}

#[tokio::test]
async fn grow_without_leader_launches_nothing() {
    let fleet = Fleet::new();
    let err = fleet
        .cluster
        .grow(&Selector::default(), 2, testkit::domain::creation_args(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cluster(ClusterError::NoSuchLeader { .. })));
    assert_eq!(fleet.cloud.calls(Call::CreateInstances), 0);
}
