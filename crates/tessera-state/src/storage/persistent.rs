use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tessera_core::serialize;

use super::{StagedMap, Storage};
use crate::error::StateError;

/// File-backed storage; every commit rewrites a single snapshot file
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    map: StagedMap,
}

impl FileStorage {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StateError> {
        let path = path.into();
        let data: BTreeMap<Vec<u8>, Vec<u8>> = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serialize::from_bytes(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StateError::Storage(e.to_string())),
        };

        Ok(FileStorage {
            path,
            map: StagedMap::from_committed(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_to_disk(&self, data: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::Storage(e.to_string()))?;
        }

        let bytes = serialize::to_bytes(data)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &bytes).map_err(|e| StateError::Storage(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| StateError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.map.stage(key, Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.map.stage(key, None);
    }

    /// Staged writes stay staged if the snapshot cannot be written
    fn commit(&mut self) -> Result<(), StateError> {
        self.flush_to_disk(&self.map.preview())?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let mut storage = FileStorage::open(&path).unwrap();
        storage.put(b"acc:1", b"alice");
        storage.commit().unwrap();
        storage.put(b"acc:2", b"uncommitted");

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get(b"acc:1"), Some(b"alice".to_vec()));
        assert_eq!(reopened.get(b"acc:2"), None);
    }

    #[test]
    fn test_failed_flush_keeps_writes_staged() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the snapshot file makes the rename fail
        let path = dir.path().join("blocked.db");
        fs::create_dir_all(path.join("inner")).unwrap();

        let mut storage = FileStorage::open(dir.path().join("ok.db")).unwrap();
        storage.put(b"acc:1", b"alice");
        storage.commit().unwrap();

        let mut blocked = FileStorage {
            path,
            map: storage.map.clone(),
        };
        blocked.put(b"acc:2", b"bob");
        assert!(blocked.commit().is_err());

        blocked.rollback();
        assert_eq!(blocked.get(b"acc:1"), Some(b"alice".to_vec()));
        assert_eq!(blocked.get(b"acc:2"), None);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("absent.db")).unwrap();
        assert!(storage.keys_with_prefix(b"").is_empty());
    }
}
