pub mod memory;
pub mod persistent;

use std::collections::BTreeMap;

use crate::error::StateError;

/// Byte-keyed store with staged writes
///
/// Writes are visible to reads immediately but only become durable on
/// [`Storage::commit`]; [`Storage::rollback`] discards them.
pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn put(&mut self, key: &[u8], value: &[u8]);

    fn delete(&mut self, key: &[u8]);

    fn commit(&mut self) -> Result<(), StateError>;

    fn rollback(&mut self);

    fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Keys starting with `prefix`, in ascending order
    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>>;
}

/// Committed map plus staged writes (`None` marks a delete)
#[derive(Debug, Clone, Default)]
pub(crate) struct StagedMap {
    pub(crate) data: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl StagedMap {
    pub(crate) fn from_committed(data: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        StagedMap {
            data,
            pending: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.get(key) {
            Some(staged) => staged.clone(),
            None => self.data.get(key).cloned(),
        }
    }

    pub(crate) fn stage(&mut self, key: &[u8], value: Option<&[u8]>) {
        self.pending.insert(key.to_vec(), value.map(<[u8]>::to_vec));
    }

    pub(crate) fn apply(&mut self) {
        for (key, value) in std::mem::take(&mut self.pending) {
            match value {
                Some(v) => {
                    self.data.insert(key, v);
                }
                None => {
                    self.data.remove(&key);
                }
            }
        }
    }

    /// Committed data with the staged writes applied, leaving both untouched
    pub(crate) fn preview(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut data = self.data.clone();
        for (key, value) in &self.pending {
            match value {
                Some(v) => {
                    data.insert(key.clone(), v.clone());
                }
                None => {
                    data.remove(key);
                }
            }
        }
        data
    }

    pub(crate) fn discard(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let committed = self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| !matches!(self.pending.get(*k), Some(None)))
            .map(|(k, _)| k.clone());
        let staged = self
            .pending
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, v)| v.is_some() && !self.data.contains_key(*k))
            .map(|(k, _)| k.clone());

        let mut keys: Vec<Vec<u8>> = committed.chain(staged).collect();
        keys.sort();
        keys
    }
}

pub use memory::MemoryStorage;
pub use persistent::FileStorage;
