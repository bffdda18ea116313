//! Nodes of the bipartite data/op DAG.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::compute::ComputeFn;
use crate::shape::Shape;

/// Identifier of a DAG node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub u64);

/// Identifier of a physical array buffer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DataId(pub u64);

/// Identifier of an execution device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DeviceId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Description of a physical array: its shape and where it lives.
#[derive(Clone, Debug)]
pub struct PhysicalData {
    pub shape: Shape,
    pub device_id: DeviceId,
    pub data_id: DataId,
}

/// A node representing a physical array.
///
/// `extern_rc` counts client handles referencing this array. It is mutated
/// by the handle layer without holding any graph lock, so it lives on the
/// node as an atomic rather than in the runtime info table.
pub struct DataNode {
    pub data: PhysicalData,
    extern_rc: AtomicUsize,
}

impl DataNode {
    pub(crate) fn new(data: PhysicalData) -> Self {
        DataNode {
            data,
            extern_rc: AtomicUsize::new(0),
        }
    }

    /// Number of live client handles.
    pub fn extern_rc(&self) -> usize {
        self.extern_rc.load(Ordering::SeqCst)
    }

    pub(crate) fn retain(&self) {
        self.extern_rc.fetch_add(1, Ordering::SeqCst);
    }

    /// Drops one external reference and returns the remaining count.
    pub(crate) fn release(&self) -> usize {
        let prev = self.extern_rc.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "extern_rc underflow");
        prev - 1
    }
}

/// A node representing a pending, running, or completed computation.
pub struct OpNode {
    pub device_id: DeviceId,
    pub compute_fn: Arc<dyn ComputeFn>,
    /// Ordered input data nodes.
    pub inputs: Vec<NodeId>,
    /// Ordered output data nodes. Never empty.
    pub outputs: Vec<NodeId>,
}

/// The two kinds of DAG vertices.
pub enum NodeKind {
    Data(DataNode),
    Op(OpNode),
}

/// Adjacency of a node. Vec-based: an array passed twice to one op
/// contributes two edges, keeping counts symmetric on both sides.
#[derive(Default)]
pub(crate) struct Links {
    pub preds: Vec<NodeId>,
    pub succs: Vec<NodeId>,
}

/// A vertex of the DAG: identity, per-node mutex, adjacency, payload.
///
/// The per-node mutex carries no data; it is the unit the multi-node lock
/// composes. Adjacency has its own short-lived mutex so neighborhoods can
/// be snapshotted before any per-node mutex is taken.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    lock: Mutex<()>,
    links: Mutex<Links>,
}

impl Node {
    pub(crate) fn new(id: NodeId, kind: NodeKind) -> Arc<Self> {
        Arc::new(Node {
            id,
            kind,
            lock: Mutex::new(()),
            links: Mutex::new(Links::default()),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_op(&self) -> bool {
        matches!(self.kind, NodeKind::Op(_))
    }

    /// Returns the data payload. Panics on an op node: callers reach this
    /// only through paths where the kind is already established.
    pub fn data(&self) -> &DataNode {
        match &self.kind {
            NodeKind::Data(d) => d,
            NodeKind::Op(_) => panic!("node #{} is not a data node", self.id),
        }
    }

    /// Returns the op payload. Panics on a data node.
    pub fn op(&self) -> &OpNode {
        match &self.kind {
            NodeKind::Op(o) => o,
            NodeKind::Data(_) => panic!("node #{} is not an op node", self.id),
        }
    }

    /// Snapshot of predecessor ids.
    pub fn preds(&self) -> Vec<NodeId> {
        self.links.lock().unwrap().preds.clone()
    }

    /// Snapshot of successor ids.
    pub fn succs(&self) -> Vec<NodeId> {
        self.links.lock().unwrap().succs.clone()
    }

    pub(crate) fn links(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap()
    }

    pub(crate) fn node_lock(&self) -> &Mutex<()> {
        &self.lock
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            NodeKind::Data(d) => format!("Data(data_id={})", d.data.data_id),
            NodeKind::Op(o) => format!("Op(fn={})", o.compute_fn.name()),
        };
        write!(f, "Node(#{}, {})", self.id, kind)
    }
}
