//! Client handles to array data.

use std::fmt;
use std::sync::Arc;

use crate::dag::{Node, NodeId};
use crate::scheduler::SchedulerShared;
use crate::shape::Shape;

/// A client-held reference to an array in the DAG.
///
/// Cloning bumps the array's external reference count; dropping the last
/// clone lets the scheduler reclaim the array once nothing in the graph
/// needs it either. Dropping never blocks.
pub struct ArrayRef {
    node: Arc<Node>,
    scheduler: Arc<SchedulerShared>,
}

impl ArrayRef {
    pub(crate) fn new(node: Arc<Node>, scheduler: Arc<SchedulerShared>) -> Self {
        node.data().retain();
        ArrayRef { node, scheduler }
    }

    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    pub fn shape(&self) -> &Shape {
        &self.node.data().data.shape
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

impl Clone for ArrayRef {
    fn clone(&self) -> Self {
        self.node.data().retain();
        ArrayRef {
            node: self.node.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl Drop for ArrayRef {
    fn drop(&mut self) {
        self.node.data().release();
        self.scheduler.on_extern_rc_update(&self.node);
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayRef")
            .field("node_id", &self.node.id())
            .field("shape", self.shape())
            .finish()
    }
}
