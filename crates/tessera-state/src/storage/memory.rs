use super::{StagedMap, Storage};
use crate::error::StateError;

/// In-memory storage, used by tests and ephemeral nodes
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    map: StagedMap,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Number of committed keys
    pub fn len(&self) -> usize {
        self.map.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.data.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.map.stage(key, Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.map.stage(key, None);
    }

    fn commit(&mut self) -> Result<(), StateError> {
        self.map.apply();
        Ok(())
    }

    fn rollback(&mut self) {
        self.map.discard();
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.map.keys_with_prefix(prefix)
    }
}
