use std::sync::{Arc, Mutex};

use fleetwright::domain::{Bindable, InstanceId, Node};
use fleetwright::error::{ClusterError, Error};
use fleetwright::port::{operation_fn, NodeOperation};

/// Records every node an operation ran on, in order.
#[derive(Clone, Default)]
pub struct Recorder {
    visited: Arc<Mutex<Vec<InstanceId>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// An operation that records the node and succeeds.
    pub fn operation(&self) -> Arc<dyn NodeOperation> {
        let visited = Arc::clone(&self.visited);
        Arc::new(operation_fn("record", move |node: Node| {
            let visited = Arc::clone(&visited);
            async move {
                let id = node.require_instance_id()?.clone();
                visited.lock().unwrap().push(id);
                Ok::<_, Error>(())
            }
        }))
    }

    /// An operation that records the node and fails on `failing`.
    pub fn failing_on(&self, failing: InstanceId) -> Arc<dyn NodeOperation> {
        let visited = Arc::clone(&self.visited);
        Arc::new(operation_fn("record-or-fail", move |node: Node| {
            let visited = Arc::clone(&visited);
            let failing = failing.clone();
            async move {
                let id = node.require_instance_id()?.clone();
                visited.lock().unwrap().push(id.clone());
                if id == failing {
                    return Err(Error::from(ClusterError::Unbound {
                        role: "injected".into(),
                    }));
                }
                Ok::<_, Error>(())
            }
        }))
    }

    pub fn visited(&self) -> Vec<InstanceId> {
        self.visited.lock().unwrap().clone()
    }
}
