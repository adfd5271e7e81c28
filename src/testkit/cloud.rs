//! In-memory [`CloudProvider`] for testing.
//!
//! [`MemoryCloud`] keeps instances in a map and simulates just enough of a
//! control plane for the orchestration code:
//!
//! - Scripted failures: queue errors per [`Call`] with
//!   [`fail_next`](MemoryCloud::fail_next); each call pops one before doing
//!   anything else.
//! - Boot behaviour: every launched instance takes the next [`Boot`] from the
//!   plan (default: running on the first poll).
//! - Transitions: stopping, shutting-down and freshly started instances
//!   settle on the next observation.
//! - Counters for every call, plus the order in which instances were first
//!   observed running.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::domain::id::{ImageId, InstanceId, RoleName};
use crate::domain::instance::{
    Instance, InstanceSpec, InstanceState, Tags, FILTER_INSTANCE_ID, TAG_NAME,
};
use crate::error::CloudError;
use crate::port::outbound::cloud::CloudProvider;

/// Provider operations, for scripting failures and counting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    FindInstance,
    CreateInstances,
    ListInstances,
    DescribeInstance,
    TagInstance,
    StartInstance,
    StopInstance,
    TerminateInstance,
    CreateImage,
}

/// How a launched instance leaves the pending state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boot {
    /// Running once it has been polled this many times.
    RunningAfter(u32),
    /// Pending forever.
    StuckPending,
    /// Jumps to the given state on the first poll.
    Becomes(InstanceState),
}

impl Default for Boot {
    fn default() -> Self {
        Self::RunningAfter(1)
    }
}

struct Record {
    instance: Instance,
    boot: Boot,
    polls: u32,
}

#[derive(Default)]
struct State {
    instances: BTreeMap<InstanceId, Record>,
    failures: HashMap<Call, VecDeque<CloudError>>,
    calls: HashMap<Call, usize>,
    boot_plan: VecDeque<Boot>,
    shortfall: usize,
    observed_running: Vec<InstanceId>,
    sequence: u64,
}

impl State {
    fn enter(&mut self, call: Call) -> Result<(), CloudError> {
        *self.calls.entry(call).or_default() += 1;
        match self.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn record_mut(&mut self, id: &InstanceId) -> Result<&mut Record, CloudError> {
        self.instances.get_mut(id).ok_or_else(|| not_found(id))
    }

    /// Advance the instance one observation and return its new state.
    fn observe(&mut self, id: &InstanceId) -> Result<Instance, CloudError> {
        let record = self.instances.get_mut(id).ok_or_else(|| not_found(id))?;
        let before = record.instance.state;
        let after = match before {
            InstanceState::Pending => {
                record.polls += 1;
                match record.boot {
                    Boot::RunningAfter(polls) if record.polls >= polls => InstanceState::Running,
                    Boot::RunningAfter(_) | Boot::StuckPending => InstanceState::Pending,
                    Boot::Becomes(state) => state,
                }
            }
            InstanceState::Stopping => InstanceState::Stopped,
            InstanceState::ShuttingDown => InstanceState::Terminated,
            other => other,
        };
        record.instance.state = after;
        let instance = record.instance.clone();
        if before != InstanceState::Running
            && after == InstanceState::Running
            && !self.observed_running.contains(id)
        {
            self.observed_running.push(id.clone());
        }
        Ok(instance)
    }
}

fn not_found(id: &InstanceId) -> CloudError {
    CloudError::permanent(
        "InvalidInstanceID.NotFound",
        format!("The instance ID '{id}' does not exist"),
    )
}

fn incorrect_state(id: &InstanceId, state: InstanceState) -> CloudError {
    CloudError::permanent(
        "IncorrectInstanceState",
        format!("The instance '{id}' is not in a state from which it can be changed ({state})"),
    )
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_400_000_000, 0)
        .single()
        .unwrap_or_default()
}

/// An in-memory cloud.
#[derive(Default)]
pub struct MemoryCloud {
    state: Mutex<State>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boot behaviours handed to launched instances in launch order.
    pub fn with_boot_plan(self, plan: Vec<Boot>) -> Self {
        self.state.lock().boot_plan = plan.into();
        self
    }

    /// Make every later `create_instances` launch `missing` fewer instances.
    pub fn with_shortfall(self, missing: usize) -> Self {
        self.state.lock().shortfall = missing;
        self
    }

    /// Queue `err` for the next invocation of `call`.
    pub fn fail_next(&self, call: Call, err: CloudError) {
        self.state
            .lock()
            .failures
            .entry(call)
            .or_default()
            .push_back(err);
    }

    /// Number of times `call` was invoked, failures included.
    pub fn calls(&self, call: Call) -> usize {
        self.state.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Total number of provider calls.
    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// Instances in the order they were first observed running.
    pub fn observed_running(&self) -> Vec<InstanceId> {
        self.state.lock().observed_running.clone()
    }

    pub fn instance(&self, id: &InstanceId) -> Option<Instance> {
        self.state
            .lock()
            .instances
            .get(id)
            .map(|record| record.instance.clone())
    }

    /// All instances, sorted by ID.
    pub fn instances(&self) -> Vec<Instance> {
        self.state
            .lock()
            .instances
            .values()
            .map(|record| record.instance.clone())
            .collect()
    }

    /// Add an existing instance performing the namespace-qualified `name`.
    pub fn seed(&self, name: &str, state: InstanceState, tags: Tags) -> Instance {
        let mut inner = self.state.lock();
        let sequence = inner.next_sequence();
        let mut instance = new_instance(sequence, ImageId::new("ami-seed"), tags);
        instance.state = state;
        instance.tags.insert(TAG_NAME.into(), name.to_string());
        inner.instances.insert(
            instance.id.clone(),
            Record {
                instance: instance.clone(),
                boot: Boot::default(),
                polls: 0,
            },
        );
        instance
    }
}

fn new_instance(sequence: u64, image_id: ImageId, tags: Tags) -> Instance {
    let suffix = Uuid::new_v4().simple().to_string();
    Instance {
        id: InstanceId::new(format!("i-{sequence:05}{}", &suffix[..8])),
        image_id,
        state: InstanceState::Pending,
        launch_time: epoch() + ChronoDuration::seconds(i64::try_from(sequence).unwrap_or(0)),
        tags,
        private_ip: Some(format!("10.0.{}.{}", sequence / 256, sequence % 256)),
        public_ip: None,
    }
}

fn matches_filter(instance: &Instance, filter: &Tags) -> bool {
    filter.iter().all(|(key, value)| {
        if key == FILTER_INSTANCE_ID {
            instance.id.as_str() == value
        } else {
            instance.tag(key) == Some(value.as_str())
        }
    })
}

#[async_trait]
impl CloudProvider for MemoryCloud {
    async fn find_instance(
        &self,
        role: &RoleName,
        filter: &Tags,
    ) -> Result<Option<Instance>, CloudError> {
        let mut state = self.state.lock();
        state.enter(Call::FindInstance)?;
        Ok(state
            .instances
            .values()
            .map(|record| &record.instance)
            .find(|instance| {
                !instance.is_terminated()
                    && instance.tag(TAG_NAME) == Some(role.as_str())
                    && matches_filter(instance, filter)
            })
            .cloned())
    }

    async fn create_instances(
        &self,
        spec: &InstanceSpec,
        count: usize,
    ) -> Result<Vec<Instance>, CloudError> {
        let mut state = self.state.lock();
        state.enter(Call::CreateInstances)?;
        let launched = count.saturating_sub(state.shortfall);
        let mut instances = Vec::with_capacity(launched);
        for _ in 0..launched {
            let sequence = state.next_sequence();
            let boot = state.boot_plan.pop_front().unwrap_or_default();
            let instance = new_instance(sequence, spec.image.clone(), spec.tags.clone());
            state.instances.insert(
                instance.id.clone(),
                Record {
                    instance: instance.clone(),
                    boot,
                    polls: 0,
                },
            );
            instances.push(instance);
        }
        Ok(instances)
    }

    async fn list_instances(
        &self,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Vec<Instance>, CloudError> {
        let mut state = self.state.lock();
        state.enter(Call::ListInstances)?;
        Ok(state
            .instances
            .values()
            .filter(|record| record.instance.tag(tag_key) == Some(tag_value))
            .map(|record| record.instance.clone())
            .collect())
    }

    async fn describe_instance(&self, instance_id: &InstanceId) -> Result<Instance, CloudError> {
        let mut state = self.state.lock();
        state.enter(Call::DescribeInstance)?;
        state.observe(instance_id)
    }

    async fn tag_instance(&self, instance_id: &InstanceId, tags: &Tags) -> Result<(), CloudError> {
        let mut state = self.state.lock();
        state.enter(Call::TagInstance)?;
        let record = state.record_mut(instance_id)?;
        record
            .instance
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn start_instance(&self, instance_id: &InstanceId) -> Result<(), CloudError> {
        let mut state = self.state.lock();
        state.enter(Call::StartInstance)?;
        let record = state.record_mut(instance_id)?;
        match record.instance.state {
            InstanceState::Stopped => {
                record.instance.state = InstanceState::Pending;
                record.boot = Boot::default();
                record.polls = 0;
                Ok(())
            }
            other => Err(incorrect_state(instance_id, other)),
        }
    }

    async fn stop_instance(&self, instance_id: &InstanceId) -> Result<(), CloudError> {
        let mut state = self.state.lock();
        state.enter(Call::StopInstance)?;
        let record = state.record_mut(instance_id)?;
        match record.instance.state {
            InstanceState::Running => {
                record.instance.state = InstanceState::Stopping;
                Ok(())
            }
            other => Err(incorrect_state(instance_id, other)),
        }
    }

    async fn terminate_instance(&self, instance_id: &InstanceId) -> Result<(), CloudError> {
        let mut state = self.state.lock();
        state.enter(Call::TerminateInstance)?;
        let record = state.record_mut(instance_id)?;
        if !record.instance.is_terminated() {
            record.instance.state = InstanceState::ShuttingDown;
        }
        Ok(())
    }

    async fn create_image(&self, instance_id: &InstanceId) -> Result<ImageId, CloudError> {
        let mut state = self.state.lock();
        state.enter(Call::CreateImage)?;
        state.record_mut(instance_id)?;
        let sequence = state.next_sequence();
        Ok(ImageId::new(format!("ami-{sequence:08x}")))
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
