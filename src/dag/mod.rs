//! The physical DAG: node types, the container, and multi-node locking.

mod graph;
mod lock;
mod node;

pub use graph::PhysicalDag;
pub use lock::{LockScope, MultiNodeLock};
pub use node::{DataId, DataNode, DeviceId, Node, NodeId, NodeKind, OpNode, PhysicalData};
