//! Registry of devices and owner of array-memory bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::debug;
use rustc_hash::FxHashMap;

use crate::dag::{DataId, DeviceId};
use crate::device::{CpuDevice, DataStorage, Device, DeviceError, DeviceListener, ListenerSlot};

/// Owns the execution backends and the storage backing array data. The
/// scheduler talks to devices and to data memory only through this type.
pub struct DeviceManager {
    devices: Mutex<FxHashMap<DeviceId, Arc<dyn Device>>>,
    storage: Arc<DataStorage>,
    listener: ListenerSlot,
    next_data_id: AtomicU64,
}

impl DeviceManager {
    pub fn new() -> Self {
        DeviceManager {
            devices: Mutex::new(FxHashMap::default()),
            storage: Arc::new(DataStorage::new()),
            listener: ListenerSlot::new(),
            next_data_id: AtomicU64::new(0),
        }
    }

    /// Convenience constructor: a manager with `count` CPU devices, ids
    /// `0..count`.
    pub fn with_cpu_devices(count: u64) -> Arc<Self> {
        let dm = Arc::new(Self::new());
        for i in 0..count {
            dm.add_cpu_device(DeviceId(i));
        }
        dm
    }

    pub fn add_cpu_device(&self, id: DeviceId) {
        let device = CpuDevice::spawn(id, self.storage.clone(), self.listener.clone());
        self.add_device(Arc::new(device));
    }

    pub fn add_device(&self, device: Arc<dyn Device>) {
        let id = device.device_id();
        let prev = self.devices.lock().unwrap().insert(id, device);
        assert!(prev.is_none(), "device #{} registered twice", id);
    }

    /// Registers the completion listener every device reports to. Called
    /// once, by the scheduler, at construction.
    pub fn register_listener(&self, listener: Weak<dyn DeviceListener>) {
        self.listener.set(listener);
    }

    pub fn try_device(&self, id: DeviceId) -> Option<Arc<dyn Device>> {
        self.devices.lock().unwrap().get(&id).cloned()
    }

    /// Looks up a device that must exist; placement was validated when the
    /// op was created.
    pub fn device(&self, id: DeviceId) -> Arc<dyn Device> {
        self.try_device(id)
            .unwrap_or_else(|| panic!("no device #{} registered", id))
    }

    pub fn generate_data_id(&self) -> DataId {
        DataId(self.next_data_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Releases the memory backing a dead array.
    pub fn free_data(&self, id: DataId) {
        debug!("free data #{}", id);
        self.storage.free(id);
    }

    /// Host copy of a resident array.
    pub fn read_data(&self, id: DataId) -> Result<Vec<f32>, DeviceError> {
        self.storage.read(id)
    }

    pub fn storage(&self) -> &Arc<DataStorage> {
        &self.storage
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}
