//! Execution devices and the memory they compute over.

mod cpu;
mod manager;
mod storage;

pub use cpu::CpuDevice;
pub use manager::DeviceManager;
pub use storage::DataStorage;

use std::sync::{Arc, Mutex, Weak};

use log::warn;
use thiserror::Error;

use crate::dag::{DataId, DeviceId};
use crate::task::Task;

/// Error type for device and storage operations. `Execution` is also the
/// variant user compute fns report their own failures through.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("data #{0} is not resident in storage")]
    MissingData(DataId),

    #[error("data #{0} is already allocated")]
    AlreadyAllocated(DataId),

    #[error("compute fn `{fn_name}` failed: {reason}")]
    Execution { fn_name: String, reason: String },
}

/// An execution backend. Accepts opaque tasks and signals their completion
/// asynchronously through the registered [`DeviceListener`].
pub trait Device: Send + Sync {
    fn device_id(&self) -> DeviceId;

    /// Hands a task to the device. Never blocks the caller.
    fn push_task(&self, task: Task);
}

/// The callback surface a device invokes when a task finishes.
pub trait DeviceListener: Send + Sync {
    fn on_operation_complete(&self, task: &Task);
}

/// Shared slot devices read their completion listener from. Weak so the
/// device layer never keeps the listener alive.
#[derive(Clone)]
pub struct ListenerSlot {
    inner: Arc<Mutex<Option<Weak<dyn DeviceListener>>>>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        ListenerSlot {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn set(&self, listener: Weak<dyn DeviceListener>) {
        *self.inner.lock().unwrap() = Some(listener);
    }

    pub(crate) fn notify(&self, task: &Task) {
        let listener = self.inner.lock().unwrap().as_ref().and_then(Weak::upgrade);
        match listener {
            Some(listener) => listener.on_operation_complete(task),
            None => warn!("completion of node #{} dropped: no listener", task.id),
        }
    }
}

impl Default for ListenerSlot {
    fn default() -> Self {
        Self::new()
    }
}
