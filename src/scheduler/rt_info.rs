//! Per-node runtime bookkeeping.

use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::dag::NodeId;

/// Execution state of a node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeState {
    Ready,
    Completed,
}

/// Counts deciding when an op may run and when a node is dead.
#[derive(Debug)]
pub struct RuntimeInfo {
    pub state: NodeState,
    /// Predecessors that have not completed yet.
    pub num_triggers_needed: usize,
    /// Successors still alive in the DAG.
    pub reference_count: usize,
}

impl RuntimeInfo {
    fn new() -> Self {
        RuntimeInfo {
            state: NodeState::Ready,
            num_triggers_needed: 0,
            reference_count: 0,
        }
    }
}

/// Maps node ids to their runtime info.
///
/// The table's mutex protects the map structure only. The semantics of an
/// entry are guarded by the multi-node lock its callers hold over the
/// nodes they touch.
pub struct RuntimeInfoTable {
    entries: Mutex<FxHashMap<NodeId, RuntimeInfo>>,
}

impl RuntimeInfoTable {
    pub fn new() -> Self {
        RuntimeInfoTable {
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Registers a node as `Ready` with zeroed counts.
    pub fn add_node(&self, id: NodeId) {
        let prev = self.entries.lock().unwrap().insert(id, RuntimeInfo::new());
        assert!(prev.is_none(), "runtime info for node #{} added twice", id);
    }

    /// Drops a node's entry. Called exactly once per node.
    pub fn remove_node(&self, id: NodeId) {
        let removed = self.entries.lock().unwrap().remove(&id);
        assert!(
            removed.is_some(),
            "runtime info for node #{} removed twice or never added",
            id
        );
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.lock().unwrap().contains_key(&id)
    }

    pub fn state(&self, id: NodeId) -> NodeState {
        self.entry(id, |ri| ri.state)
    }

    /// Runs `f` on the entry and returns its result.
    pub fn update<R>(&self, id: NodeId, f: impl FnOnce(&mut RuntimeInfo) -> R) -> R {
        self.entry(id, f)
    }

    fn entry<R>(&self, id: NodeId, f: impl FnOnce(&mut RuntimeInfo) -> R) -> R {
        let mut entries = self.entries.lock().unwrap();
        let info = entries
            .get_mut(&id)
            .unwrap_or_else(|| panic!("no runtime info for node #{}", id));
        f(info)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RuntimeInfoTable {
    fn default() -> Self {
        Self::new()
    }
}
