//! Scoped locking of a node together with its 1-hop neighborhood.

use std::sync::{Arc, MutexGuard};

use crate::dag::graph::PhysicalDag;
use crate::dag::node::{Node, NodeId};

/// A snapshot of the nodes a critical section must cover, id-sorted and
/// deduplicated. Constructed first so the guards of [`MultiNodeLock`] can
/// borrow from it.
///
/// The snapshot is taken before any per-node mutex is held; a neighbor
/// removed between snapshot and acquisition is simply locked as a detached
/// node, which is harmless. Edges added to a locked node from inside the
/// critical section are performed by the holder itself.
pub struct LockScope {
    nodes: Vec<Arc<Node>>,
}

impl LockScope {
    /// Covers `node` and all of its direct predecessors and successors.
    pub fn around(dag: &PhysicalDag, node: &Arc<Node>) -> Self {
        let mut nodes = vec![node.clone()];
        let (preds, succs) = {
            let links = node.links();
            (links.preds.clone(), links.succs.clone())
        };
        for id in preds.into_iter().chain(succs) {
            if let Some(n) = dag.get(id) {
                nodes.push(n);
            }
        }
        Self::finish(nodes)
    }

    /// Covers each listed data node plus every op node adjacent to any of
    /// them (in a bipartite graph, every neighbor of a data node is an op).
    pub fn over_inputs(dag: &PhysicalDag, data_nodes: &[Arc<Node>]) -> Self {
        let mut nodes = data_nodes.to_vec();
        for data_node in data_nodes {
            let (preds, succs) = {
                let links = data_node.links();
                (links.preds.clone(), links.succs.clone())
            };
            for id in preds.into_iter().chain(succs) {
                if let Some(n) = dag.get(id) {
                    nodes.push(n);
                }
            }
        }
        Self::finish(nodes)
    }

    fn finish(mut nodes: Vec<Arc<Node>>) -> Self {
        nodes.sort_by_key(|n| n.id());
        nodes.dedup_by_key(|n| n.id());
        LockScope { nodes }
    }

    /// Acquires every per-node mutex in ascending id order. Guards release
    /// on drop, on every path.
    pub fn lock(&self) -> MultiNodeLock<'_> {
        MultiNodeLock {
            _guards: self
                .nodes
                .iter()
                .map(|n| n.node_lock().lock().unwrap())
                .collect(),
        }
    }

    pub(crate) fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id()).collect()
    }
}

/// Holds the per-node mutexes of a [`LockScope`] for one critical section.
pub struct MultiNodeLock<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ComputeFn, FnCompute};
    use crate::dag::node::{DataId, DeviceId, PhysicalData};
    use crate::shape::Shape;
    use std::thread;

    fn noop() -> Arc<dyn ComputeFn> {
        Arc::new(FnCompute::new("noop", |_, _| Ok(())))
    }

    fn diamond(dag: &PhysicalDag) -> Vec<Arc<Node>> {
        // a -> op1 -> b, a -> op2 -> c
        let mk = |i| {
            dag.new_data_node(PhysicalData {
                shape: Shape::new([1]),
                device_id: DeviceId(0),
                data_id: DataId(i),
            })
        };
        let a = mk(0);
        let b = mk(1);
        let c = mk(2);
        dag.new_op_node(&[a.clone()], &[b.clone()], noop(), DeviceId(0));
        dag.new_op_node(&[a.clone()], &[c.clone()], noop(), DeviceId(0));
        vec![a, b, c]
    }

    #[test]
    fn test_scope_is_sorted_and_deduped() {
        let dag = PhysicalDag::new();
        let nodes = diamond(&dag);

        let scope = LockScope::around(&dag, &nodes[0]);
        let ids = scope.node_ids();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        // a plus its two consumer ops
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_over_inputs_covers_adjacent_ops() {
        let dag = PhysicalDag::new();
        let nodes = diamond(&dag);

        let scope = LockScope::over_inputs(&dag, &[nodes[1].clone(), nodes[2].clone()]);
        // b, c, and their two producer ops
        assert_eq!(scope.node_ids().len(), 4);
    }

    #[test]
    fn test_overlapping_scopes_do_not_deadlock() {
        let dag = Arc::new(PhysicalDag::new());
        let nodes = diamond(&dag);
        let (a, b) = (nodes[0].clone(), nodes[1].clone());

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|start| {
                let dag = dag.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let scope = LockScope::around(&dag, &start);
                        let _lock = scope.lock();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
