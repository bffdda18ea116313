//! Container for the physical DAG.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::compute::ComputeFn;
use crate::dag::node::{DataNode, DeviceId, Node, NodeId, NodeKind, OpNode, PhysicalData};

/// Owns node storage and edge wiring for the bipartite data/op graph.
///
/// The container mutex protects only the id map; the semantics of a node's
/// counts and adjacency are guarded by the multi-node lock held by callers.
pub struct PhysicalDag {
    nodes: Mutex<FxHashMap<NodeId, Arc<Node>>>,
    next_id: AtomicU64,
}

impl PhysicalDag {
    pub fn new() -> Self {
        PhysicalDag {
            nodes: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
        }
    }

    fn alloc_id(&self) -> NodeId {
        NodeId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocates a new data node with no edges.
    pub fn new_data_node(&self, data: PhysicalData) -> Arc<Node> {
        let id = self.alloc_id();
        let node = Node::new(id, NodeKind::Data(DataNode::new(data)));
        self.nodes.lock().unwrap().insert(id, node.clone());
        node
    }

    /// Allocates a new op node and wires its edges: one edge from every
    /// input data node and one edge to every output data node. Callers hold
    /// the multi-node lock over `inputs` while this runs.
    pub fn new_op_node(
        &self,
        inputs: &[Arc<Node>],
        outputs: &[Arc<Node>],
        compute_fn: Arc<dyn ComputeFn>,
        device_id: DeviceId,
    ) -> Arc<Node> {
        let id = self.alloc_id();
        let op = OpNode {
            device_id,
            compute_fn,
            inputs: inputs.iter().map(|n| n.id()).collect(),
            outputs: outputs.iter().map(|n| n.id()).collect(),
        };
        let node = Node::new(id, NodeKind::Op(op));
        for input in inputs {
            input.links().succs.push(id);
            node.links().preds.push(input.id());
        }
        for output in outputs {
            node.links().succs.push(output.id());
            output.links().preds.push(id);
        }
        self.nodes.lock().unwrap().insert(id, node.clone());
        node
    }

    /// Looks up a node, returning `None` if it has been removed.
    pub fn get(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.lock().unwrap().get(&id).cloned()
    }

    /// Looks up a node that must exist. A miss is a bookkeeping bug.
    pub fn node(&self, id: NodeId) -> Arc<Node> {
        self.get(id)
            .unwrap_or_else(|| panic!("node #{} not in dag", id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.lock().unwrap().contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    /// Removes a node, detaching every edge to it from the neighbors' side.
    /// The removed node keeps its own adjacency lists so callers can still
    /// walk them; ownership transfers to the caller, who drops it outside
    /// any lock.
    pub fn remove_node(&self, id: NodeId) -> Arc<Node> {
        let node = self
            .nodes
            .lock()
            .unwrap()
            .remove(&id)
            .unwrap_or_else(|| panic!("node #{} not in dag", id));
        let (preds, succs) = {
            let links = node.links();
            (links.preds.clone(), links.succs.clone())
        };
        for pred_id in preds {
            if let Some(pred) = self.get(pred_id) {
                pred.links().succs.retain(|&s| s != id);
            }
        }
        for succ_id in succs {
            if let Some(succ) = self.get(succ_id) {
                succ.links().preds.retain(|&p| p != id);
            }
        }
        node
    }
}

impl Default for PhysicalDag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::FnCompute;
    use crate::dag::node::DataId;
    use crate::shape::Shape;

    fn dag_with_data(dag: &PhysicalDag, n: u64) -> Vec<Arc<Node>> {
        (0..n)
            .map(|i| {
                dag.new_data_node(PhysicalData {
                    shape: Shape::new([4]),
                    device_id: DeviceId(0),
                    data_id: DataId(i),
                })
            })
            .collect()
    }

    fn noop() -> Arc<dyn ComputeFn> {
        Arc::new(FnCompute::new("noop", |_, _| Ok(())))
    }

    #[test]
    fn test_op_node_wiring() {
        let dag = PhysicalDag::new();
        let data = dag_with_data(&dag, 3);
        let op = dag.new_op_node(&data[..2], &data[2..], noop(), DeviceId(0));

        assert_eq!(op.preds(), vec![data[0].id(), data[1].id()]);
        assert_eq!(op.succs(), vec![data[2].id()]);
        assert_eq!(data[0].succs(), vec![op.id()]);
        assert_eq!(data[2].preds(), vec![op.id()]);
        assert_eq!(dag.node_count(), 4);
    }

    #[test]
    fn test_duplicate_input_keeps_two_edges() {
        let dag = PhysicalDag::new();
        let data = dag_with_data(&dag, 2);
        let inputs = vec![data[0].clone(), data[0].clone()];
        let op = dag.new_op_node(&inputs, &data[1..], noop(), DeviceId(0));

        assert_eq!(op.preds(), vec![data[0].id(), data[0].id()]);
        assert_eq!(data[0].succs(), vec![op.id(), op.id()]);
    }

    #[test]
    fn test_remove_detaches_neighbors() {
        let dag = PhysicalDag::new();
        let data = dag_with_data(&dag, 2);
        let op = dag.new_op_node(&data[..1], &data[1..], noop(), DeviceId(0));

        let removed = dag.remove_node(data[0].id());
        assert!(!dag.contains(data[0].id()));
        assert_eq!(op.preds(), Vec::<NodeId>::new());
        // The removed node still knows its own neighbors.
        assert_eq!(removed.succs(), vec![op.id()]);
    }

    #[test]
    #[should_panic(expected = "not in dag")]
    fn test_remove_twice_panics() {
        let dag = PhysicalDag::new();
        let data = dag_with_data(&dag, 1);
        dag.remove_node(data[0].id());
        dag.remove_node(data[0].id());
    }
}
