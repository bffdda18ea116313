//! The dispatcher's work queue: MPSC with a kill signal.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use crate::dag::NodeId;

/// What the dispatcher should do with a node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskKind {
    /// Dispatch an op to its device, or complete a data node directly.
    Run,
    /// Run the completion step.
    Complete,
}

enum Signal {
    Task(TaskKind, NodeId),
    Kill,
}

/// Producer side. Client threads, device threads, and the dispatcher
/// itself push; FIFO per producer.
pub struct DispatcherQueue {
    sender: Mutex<Sender<Signal>>,
}

/// Consumer side, owned by the dispatcher thread.
pub struct DispatcherInbox {
    receiver: Receiver<Signal>,
}

pub fn dispatcher_queue() -> (DispatcherQueue, DispatcherInbox) {
    let (sender, receiver) = channel();
    (
        DispatcherQueue {
            sender: Mutex::new(sender),
        },
        DispatcherInbox { receiver },
    )
}

impl DispatcherQueue {
    /// Non-blocking enqueue; wakes the dispatcher if it is parked in `pop`.
    pub fn push(&self, kind: TaskKind, id: NodeId) {
        self.sender
            .lock()
            .unwrap()
            .send(Signal::Task(kind, id))
            .unwrap_or_else(|_| panic!("dispatcher queue closed while pushing node #{}", id));
    }

    /// Makes the active or next `pop` return `None`. The kill signal rides
    /// the same channel, so it lands after everything already queued; the
    /// scheduler drains all work before sending it.
    pub fn signal_for_kill(&self) {
        let _ = self.sender.lock().unwrap().send(Signal::Kill);
    }
}

impl DispatcherInbox {
    /// Blocks until a task arrives. Returns `None` on kill or once every
    /// producer is gone.
    pub fn pop(&self) -> Option<(TaskKind, NodeId)> {
        match self.receiver.recv() {
            Ok(Signal::Task(kind, id)) => Some((kind, id)),
            Ok(Signal::Kill) | Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_per_producer() {
        let (queue, inbox) = dispatcher_queue();
        queue.push(TaskKind::Run, NodeId(1));
        queue.push(TaskKind::Complete, NodeId(2));
        assert_eq!(inbox.pop(), Some((TaskKind::Run, NodeId(1))));
        assert_eq!(inbox.pop(), Some((TaskKind::Complete, NodeId(2))));
    }

    #[test]
    fn test_kill_terminates_pop() {
        let (queue, inbox) = dispatcher_queue();
        queue.push(TaskKind::Run, NodeId(1));
        queue.signal_for_kill();
        assert_eq!(inbox.pop(), Some((TaskKind::Run, NodeId(1))));
        assert_eq!(inbox.pop(), None);
    }
}
