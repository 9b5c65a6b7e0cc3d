use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use halcyon_core::serialize;

use super::{Overlay, Storage};
use crate::error::StateError;

/// File-backed storage: the whole key space is one snapshot file, rewritten
/// through a temporary file and a rename on every commit.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    inner: Overlay,
}

impl FileStorage {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StateError> {
        let path = path.into();
        let data: BTreeMap<Vec<u8>, Vec<u8>> = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serialize::from_bytes(&bytes)
                .map_err(|e| StateError::Serialization(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StateError::Storage(e.to_string())),
        };

        Ok(FileStorage {
            path,
            inner: Overlay::with_data(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_to_disk(&self) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::Storage(e.to_string()))?;
        }

        let bytes = serialize::to_bytes(&self.inner.data)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &bytes).map_err(|e| StateError::Storage(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| StateError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.put(key, value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.inner.delete(key);
    }

    fn commit(&mut self) -> Result<(), StateError> {
        self.inner.apply();
        self.flush_to_disk()
    }

    fn rollback(&mut self) {
        self.inner.rollback();
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.inner.keys_with_prefix(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopen_sees_committed_writes_only() {
        let path = std::env::temp_dir().join(format!("halcyon-storage-{}.db", std::process::id()));
        let _ = fs::remove_file(&path);

        let mut storage = FileStorage::open(&path).unwrap();
        storage.put(b"state", b"s1");
        storage.commit().unwrap();
        storage.put(b"block:1", b"staged");

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get(b"state"), Some(b"s1".to_vec()));
        assert_eq!(reopened.get(b"block:1"), None);

        fs::remove_file(&path).unwrap();
    }
}
