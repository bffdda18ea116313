//! The payload handed to a device when an op is dispatched.

use std::fmt;
use std::sync::Arc;

use crate::compute::ComputeFn;
use crate::dag::{DeviceId, NodeId, PhysicalData};

/// One array argument of a task: the physical description plus the DAG node
/// it came from.
#[derive(Clone, Debug)]
pub struct TaskData {
    pub data: PhysicalData,
    pub node_id: NodeId,
}

/// The op descriptor of a task.
#[derive(Clone)]
pub struct TaskOp {
    pub device_id: DeviceId,
    pub compute_fn: Arc<dyn ComputeFn>,
}

impl fmt::Debug for TaskOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOp")
            .field("device_id", &self.device_id)
            .field("compute_fn", &self.compute_fn.name())
            .finish()
    }
}

/// A snapshot of everything a device needs to run one op. Built by the
/// dispatcher under the multi-node lock; the scheduler holds no references
/// into it afterwards.
#[derive(Clone, Debug)]
pub struct Task {
    pub id: NodeId,
    pub op: TaskOp,
    pub inputs: Vec<TaskData>,
    pub outputs: Vec<TaskData>,
}
