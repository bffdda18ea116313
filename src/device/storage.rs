//! Host-side array storage standing in for physical device memory.

use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::dag::DataId;
use crate::device::DeviceError;

/// Buffers keyed by data id. Buffers appear when a device publishes an
/// op's outputs and disappear when the scheduler frees a dead array.
pub struct DataStorage {
    buffers: Mutex<FxHashMap<DataId, Vec<f32>>>,
}

impl DataStorage {
    pub fn new() -> Self {
        DataStorage {
            buffers: Mutex::new(FxHashMap::default()),
        }
    }

    /// Publishes a computed buffer. Each data id is written exactly once.
    pub fn insert(&self, id: DataId, buffer: Vec<f32>) -> Result<(), DeviceError> {
        let mut buffers = self.buffers.lock().unwrap();
        if buffers.contains_key(&id) {
            return Err(DeviceError::AlreadyAllocated(id));
        }
        buffers.insert(id, buffer);
        Ok(())
    }

    /// Copies a resident buffer out to the host.
    pub fn read(&self, id: DataId) -> Result<Vec<f32>, DeviceError> {
        self.buffers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(DeviceError::MissingData(id))
    }

    /// Releases a buffer. Freeing twice, or an id that was never published,
    /// is a bookkeeping bug.
    pub fn free(&self, id: DataId) {
        let removed = self.buffers.lock().unwrap().remove(&id);
        assert!(removed.is_some(), "data #{} freed but not resident", id);
    }

    pub fn contains(&self, id: DataId) -> bool {
        self.buffers.lock().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DataStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_read_free() {
        let storage = DataStorage::new();
        storage.insert(DataId(0), vec![1.0, 2.0]).unwrap();
        assert!(storage.contains(DataId(0)));
        assert_eq!(storage.read(DataId(0)).unwrap(), vec![1.0, 2.0]);
        storage.free(DataId(0));
        assert!(storage.is_empty());
    }

    #[test]
    fn test_double_insert_is_an_error() {
        let storage = DataStorage::new();
        storage.insert(DataId(0), vec![0.0]).unwrap();
        assert!(matches!(
            storage.insert(DataId(0), vec![0.0]),
            Err(DeviceError::AlreadyAllocated(_))
        ));
    }

    #[test]
    fn test_read_missing_is_an_error() {
        let storage = DataStorage::new();
        assert!(matches!(
            storage.read(DataId(7)),
            Err(DeviceError::MissingData(_))
        ));
    }

    #[test]
    #[should_panic(expected = "freed but not resident")]
    fn test_double_free_panics() {
        let storage = DataStorage::new();
        storage.insert(DataId(0), vec![0.0]).unwrap();
        storage.free(DataId(0));
        storage.free(DataId(0));
    }
}
