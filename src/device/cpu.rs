//! CPU device: a worker thread that runs compute fns over host buffers.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{error, trace};

use crate::dag::DeviceId;
use crate::device::{DataStorage, Device, DeviceError, ListenerSlot};
use crate::task::Task;

/// Executes tasks one at a time on a dedicated thread. Inputs are read
/// from storage, outputs are allocated zeroed, and the listener is
/// notified once the outputs are published.
pub struct CpuDevice {
    id: DeviceId,
    sender: Mutex<Option<Sender<Task>>>,
    worker: Option<JoinHandle<()>>,
}

impl CpuDevice {
    pub fn spawn(id: DeviceId, storage: Arc<DataStorage>, listener: ListenerSlot) -> Self {
        let (sender, receiver) = channel::<Task>();
        let worker = thread::Builder::new()
            .name(format!("cadence-cpu{}", id))
            .spawn(move || worker_loop(receiver, storage, listener))
            .expect("failed to spawn cpu device thread");
        CpuDevice {
            id,
            sender: Mutex::new(Some(sender)),
            worker: Some(worker),
        }
    }
}

impl Device for CpuDevice {
    fn device_id(&self) -> DeviceId {
        self.id
    }

    fn push_task(&self, task: Task) {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|sender| sender.send(task).ok())
            .unwrap_or_else(|| panic!("cpu device #{} worker is gone", self.id));
    }
}

impl Drop for CpuDevice {
    fn drop(&mut self) {
        // Disconnect first so the worker's recv loop ends.
        *self.sender.lock().unwrap() = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(receiver: Receiver<Task>, storage: Arc<DataStorage>, listener: ListenerSlot) {
    while let Ok(task) = receiver.recv() {
        if let Err(e) = run_task(&task, &storage) {
            // Devices report only successful completions; a failing task
            // leaves the graph unable to make progress, so crash loudly
            // instead of wedging a later wait.
            error!("device task for node #{} failed: {}", task.id, e);
            panic!("device task for node #{} failed: {}", task.id, e);
        }
        listener.notify(&task);
    }
}

fn run_task(task: &Task, storage: &DataStorage) -> Result<(), DeviceError> {
    trace!(
        "cpu device #{} running `{}` for node #{}",
        task.op.device_id,
        task.op.compute_fn.name(),
        task.id
    );
    let input_buffers: Vec<Vec<f32>> = task
        .inputs
        .iter()
        .map(|input| storage.read(input.data.data_id))
        .collect::<Result<_, _>>()?;
    let inputs: Vec<&[f32]> = input_buffers.iter().map(Vec::as_slice).collect();
    let mut outputs: Vec<Vec<f32>> = task
        .outputs
        .iter()
        .map(|output| vec![0.0; output.data.shape.numel()])
        .collect();
    task.op.compute_fn.execute(&inputs, &mut outputs)?;
    for (slot, buffer) in task.outputs.iter().zip(outputs) {
        storage.insert(slot.data.data_id, buffer)?;
    }
    Ok(())
}
