//! The scheduler core: graph growth, dispatch, completion, reclamation.
//!
//! All node state transitions run on a single dispatcher thread. Client
//! threads grow the graph and adjust external reference counts under the
//! multi-node lock; device threads only enqueue completion notifications.

mod queue;
mod rt_info;

pub use queue::{dispatcher_queue, DispatcherInbox, DispatcherQueue, TaskKind};
pub use rt_info::{NodeState, RuntimeInfo, RuntimeInfoTable};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};

use log::debug;

use crate::compute::ComputeFn;
use crate::dag::{DeviceId, LockScope, Node, NodeId, PhysicalDag, PhysicalData};
use crate::device::{DeviceError, DeviceListener, DeviceManager};
use crate::handle::ArrayRef;
use crate::shape::Shape;
use crate::task::{Task, TaskData, TaskOp};

/// Schedules compute requests over the data/op DAG and reclaims array
/// memory as soon as nothing can reference it.
///
/// Dropping the scheduler drains all submitted work, then stops and joins
/// the dispatcher thread.
pub struct DagScheduler {
    shared: Arc<SchedulerShared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl DagScheduler {
    /// Creates a scheduler over `dm`, placing new arrays on
    /// `default_device`, and registers itself as the completion listener
    /// of every device.
    pub fn new(dm: Arc<DeviceManager>, default_device: DeviceId) -> Self {
        let (queue, inbox) = dispatcher_queue();
        let shared = Arc::new(SchedulerShared {
            dag: PhysicalDag::new(),
            rt_info: RuntimeInfoTable::new(),
            queue,
            dm: dm.clone(),
            default_device,
            pending: AtomicUsize::new(0),
            finish: Mutex::new(None),
            finish_cond: Condvar::new(),
        });
        let shared_dyn: Arc<dyn DeviceListener> = shared.clone();
        let listener: Weak<dyn DeviceListener> = Arc::downgrade(&shared_dyn);
        dm.register_listener(listener);
        let dispatcher_shared = shared.clone();
        let dispatcher = thread::Builder::new()
            .name("cadence-dispatcher".into())
            .spawn(move || dispatcher_shared.dispatcher_loop(inbox))
            .expect("failed to spawn dispatcher thread");
        DagScheduler {
            shared,
            dispatcher: Some(dispatcher),
        }
    }

    /// Submits a compute request on the default device. One result handle
    /// per result shape; the op runs once every param has completed.
    pub fn create(
        &self,
        params: &[&ArrayRef],
        result_shapes: &[Shape],
        compute_fn: Arc<dyn ComputeFn>,
    ) -> Vec<ArrayRef> {
        self.create_on(self.shared.default_device, params, result_shapes, compute_fn)
    }

    /// Submits a compute request with an explicit placement hint.
    pub fn create_on(
        &self,
        device: DeviceId,
        params: &[&ArrayRef],
        result_shapes: &[Shape],
        compute_fn: Arc<dyn ComputeFn>,
    ) -> Vec<ArrayRef> {
        self.shared.create(device, params, result_shapes, compute_fn)
    }

    /// Blocks until the array behind `array` has completed. At most one
    /// targeted wait may be outstanding at a time.
    pub fn wait(&self, array: &ArrayRef) {
        self.shared.wait(array.node());
    }

    /// Blocks until every submitted op and result has completed.
    pub fn wait_for_all(&self) {
        self.shared.wait_for_all();
    }

    /// Host copy of a completed array's contents, `numel` elements long.
    pub fn get_value(&self, array: &ArrayRef) -> Result<Vec<f32>, DeviceError> {
        self.shared.get_value(array.node())
    }

    /// Number of nodes currently in the DAG.
    pub fn node_count(&self) -> usize {
        self.shared.dag.node_count()
    }

    /// Number of enqueued nodes whose completion step has not run yet.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }
}

impl Drop for DagScheduler {
    fn drop(&mut self) {
        self.shared.wait_for_all();
        self.shared.queue.signal_for_kill();
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

/// State shared between client threads, the dispatcher, and handles.
pub(crate) struct SchedulerShared {
    dag: PhysicalDag,
    rt_info: RuntimeInfoTable,
    queue: DispatcherQueue,
    dm: Arc<DeviceManager>,
    default_device: DeviceId,
    /// Nodes enqueued to run whose completion step has not executed yet.
    pending: AtomicUsize,
    /// The node a targeted `wait` is parked on.
    finish: Mutex<Option<NodeId>>,
    finish_cond: Condvar,
}

impl SchedulerShared {
    fn create(
        self: &Arc<Self>,
        device: DeviceId,
        params: &[&ArrayRef],
        result_shapes: &[Shape],
        compute_fn: Arc<dyn ComputeFn>,
    ) -> Vec<ArrayRef> {
        assert!(
            !result_shapes.is_empty(),
            "an op must produce at least one result"
        );
        assert!(
            self.dm.try_device(device).is_some(),
            "no device #{} registered",
            device
        );
        for shape in result_shapes {
            assert!(!shape.is_degenerate(), "result shape {} holds no data", shape);
        }

        let result_nodes: Vec<Arc<Node>> = result_shapes
            .iter()
            .map(|shape| {
                let node = self.dag.new_data_node(PhysicalData {
                    shape: shape.clone(),
                    device_id: device,
                    data_id: self.dm.generate_data_id(),
                });
                self.rt_info.add_node(node.id());
                node
            })
            .collect();
        let param_nodes: Vec<Arc<Node>> = params
            .iter()
            .map(|param| {
                let node = param.node().clone();
                assert!(
                    self.rt_info.contains(node.id()),
                    "param node #{} is not live",
                    node.id()
                );
                node
            })
            .collect();
        let handles: Vec<ArrayRef> = result_nodes
            .iter()
            .map(|node| ArrayRef::new(node.clone(), self.clone()))
            .collect();

        // Everything from op allocation through the ready check happens
        // atomically with respect to completions on the params.
        let scope = LockScope::over_inputs(&self.dag, &param_nodes);
        let _lock = scope.lock();
        let op_node = self
            .dag
            .new_op_node(&param_nodes, &result_nodes, compute_fn, device);
        self.rt_info.add_node(op_node.id());
        debug!(
            "create op node #{} ({} inputs, {} outputs) on device #{}",
            op_node.id(),
            param_nodes.len(),
            result_nodes.len(),
            device
        );
        for param in &param_nodes {
            self.on_create_edge(param.id(), op_node.id());
        }
        for result in &result_nodes {
            self.on_create_edge(op_node.id(), result.id());
        }
        self.process_if_ready(&op_node);
        handles
    }

    fn on_create_edge(&self, from: NodeId, to: NodeId) {
        assert_eq!(
            self.rt_info.state(to),
            NodeState::Ready,
            "invalid state of node #{}",
            to
        );
        self.rt_info.update(from, |ri| ri.reference_count += 1);
        if self.rt_info.state(from) != NodeState::Completed {
            self.rt_info.update(to, |ri| ri.num_triggers_needed += 1);
        }
    }

    fn process_if_ready(&self, op_node: &Arc<Node>) {
        let id = op_node.id();
        assert_eq!(
            self.rt_info.state(id),
            NodeState::Ready,
            "invalid state of node #{}",
            id
        );
        if self.rt_info.update(id, |ri| ri.num_triggers_needed) == 0 {
            self.pending.fetch_add(1, Ordering::SeqCst);
            self.queue.push(TaskKind::Run, id);
            debug!("node #{} runnable right after creation", id);
        }
    }

    fn wait(&self, node: &Arc<Node>) {
        let id = node.id();
        let mut target = self.finish.lock().unwrap();
        assert!(target.is_none(), "a targeted wait is already in progress");
        *target = Some(id);
        while self.rt_info.state(id) != NodeState::Completed {
            target = self.finish_cond.wait(target).unwrap();
        }
        *target = None;
    }

    fn wait_for_all(&self) {
        let mut target = self.finish.lock().unwrap();
        assert!(
            target.is_none(),
            "wait_for_all while a targeted wait is in progress"
        );
        while self.pending.load(Ordering::SeqCst) != 0 {
            target = self.finish_cond.wait(target).unwrap();
        }
    }

    fn get_value(&self, node: &Arc<Node>) -> Result<Vec<f32>, DeviceError> {
        let id = node.id();
        assert_eq!(
            self.rt_info.state(id),
            NodeState::Completed,
            "get_value on unfinished node #{}",
            id
        );
        let data = &node.data().data;
        let buffer = self.dm.read_data(data.data_id)?;
        debug_assert_eq!(buffer.len(), data.shape.numel());
        Ok(buffer)
    }

    /// Called by the handle layer whenever an array's external reference
    /// count changed. Reclaims a completed array nobody references; a
    /// `Ready` array is left alone, completion will re-check.
    pub(crate) fn on_extern_rc_update(&self, node: &Arc<Node>) {
        let mut removed = None;
        {
            let scope = LockScope::around(&self.dag, node);
            let _lock = scope.lock();
            let id = node.id();
            if !self.rt_info.contains(id) {
                // A concurrent releaser already reclaimed the node.
                return;
            }
            match self.rt_info.state(id) {
                NodeState::Completed => {
                    let reference_count = self.rt_info.update(id, |ri| ri.reference_count);
                    if reference_count == 0 && node.data().extern_rc() == 0 {
                        self.free_data_node(node);
                        debug!("delete node #{} during extern reference count update", id);
                        removed = Some(self.dag.remove_node(id));
                        self.rt_info.remove_node(id);
                    }
                }
                NodeState::Ready => {}
            }
        }
        drop(removed);
    }

    fn free_data_node(&self, node: &Arc<Node>) {
        let data = &node.data().data;
        debug!("free data #{} backing node #{}", data.data_id, node.id());
        self.dm.free_data(data.data_id);
    }

    fn dispatcher_loop(&self, inbox: DispatcherInbox) {
        while let Some((kind, node_id)) = inbox.pop() {
            let node = self.dag.node(node_id);
            let mut removed = Vec::new();
            {
                let scope = LockScope::around(&self.dag, &node);
                let _lock = scope.lock();
                if kind == TaskKind::Run && node.is_op() {
                    self.dispatch_op(&node);
                } else {
                    // `Run` on a data node is the degenerate completion its
                    // producer enqueued.
                    self.complete_node(&node, &mut removed);
                }
            }
            // Release removed nodes outside the critical section.
            drop(removed);
        }
        debug!("dispatcher received kill signal; exiting");
    }

    fn dispatch_op(&self, node: &Arc<Node>) {
        let op = node.op();
        let snapshot = |ids: &[NodeId]| -> Vec<TaskData> {
            ids.iter()
                .map(|&id| TaskData {
                    data: self.dag.node(id).data().data.clone(),
                    node_id: id,
                })
                .collect()
        };
        let task = Task {
            id: node.id(),
            op: TaskOp {
                device_id: op.device_id,
                compute_fn: op.compute_fn.clone(),
            },
            inputs: snapshot(&op.inputs),
            outputs: snapshot(&op.outputs),
        };
        debug!("dispatching node #{} to device #{}", node.id(), op.device_id);
        self.dm.device(op.device_id).push_task(task);
        // State stays `Ready` until the device reports completion.
    }

    fn complete_node(&self, node: &Arc<Node>, removed: &mut Vec<Arc<Node>>) {
        let id = node.id();
        debug!("finish node #{}", id);
        self.rt_info.update(id, |ri| ri.state = NodeState::Completed);

        if node.is_op() {
            let reference_count = self.rt_info.update(id, |ri| ri.reference_count);
            assert_ne!(reference_count, 0, "op node #{} generated but not needed", id);
            for pred_id in node.preds() {
                let pred = self.dag.node(pred_id);
                let (triggers, reference_count) = self.rt_info.update(pred_id, |ri| {
                    ri.reference_count -= 1;
                    (ri.num_triggers_needed, ri.reference_count)
                });
                assert_eq!(
                    triggers, 0,
                    "trigger count nonzero on completed data node #{}",
                    pred_id
                );
                if reference_count == 0 && pred.data().extern_rc() == 0 {
                    self.free_data_node(&pred);
                    debug!("delete node #{} after its last consumer completed", pred_id);
                    removed.push(self.dag.remove_node(pred_id));
                    self.rt_info.remove_node(pred_id);
                }
            }
        } else {
            // An array nobody consumes and nobody holds dies right here.
            let reference_count = self.rt_info.update(id, |ri| ri.reference_count);
            if reference_count == 0 && node.data().extern_rc() == 0 {
                self.free_data_node(node);
                debug!("delete node #{} at completion", id);
                removed.push(self.dag.remove_node(id));
                self.rt_info.remove_node(id);
            }
            let preds = node.preds();
            assert_eq!(
                preds.len(),
                1,
                "data node #{} must have exactly one producer",
                id
            );
            let pred_id = preds[0];
            let (pred_state, triggers, reference_count) = self.rt_info.update(pred_id, |ri| {
                ri.reference_count -= 1;
                (ri.state, ri.num_triggers_needed, ri.reference_count)
            });
            assert!(
                pred_state == NodeState::Completed && triggers == 0,
                "producer op #{} of data node #{} in inconsistent state",
                pred_id,
                id
            );
            if reference_count == 0 {
                // Op nodes carry no device memory.
                debug!("delete node #{} after all results completed", pred_id);
                removed.push(self.dag.remove_node(pred_id));
                self.rt_info.remove_node(pred_id);
            }
        }

        for succ_id in node.succs() {
            let (state, triggers) = self.rt_info.update(succ_id, |ri| {
                ri.num_triggers_needed -= 1;
                (ri.state, ri.num_triggers_needed)
            });
            if state == NodeState::Ready && triggers == 0 {
                debug!("trigger node #{}", succ_id);
                self.pending.fetch_add(1, Ordering::SeqCst);
                self.queue.push(TaskKind::Run, succ_id);
            }
        }

        let remaining = self.pending.fetch_sub(1, Ordering::SeqCst) - 1;
        let target = self.finish.lock().unwrap();
        if remaining == 0 || *target == Some(id) {
            self.finish_cond.notify_all();
        }
    }
}

impl DeviceListener for SchedulerShared {
    fn on_operation_complete(&self, task: &Task) {
        self.queue.push(TaskKind::Complete, task.id);
    }
}
