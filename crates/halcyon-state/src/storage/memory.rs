use super::{Overlay, Storage};
use crate::error::StateError;

/// In-memory storage, used by tests and by nodes without a data directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Overlay,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    /// Number of committed keys
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }
}

impl Storage for MemoryStorage {
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
        Ok(())
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
    use crate::storage::{load, stage};

    #[test]
    fn test_staged_writes_visible_before_commit() {
        let mut storage = MemoryStorage::new();

        storage.put(b"state", b"v1");
        assert_eq!(storage.get(b"state"), Some(b"v1".to_vec()));
        assert!(storage.is_empty());

        storage.rollback();
        assert_eq!(storage.get(b"state"), None);
    }

    #[test]
    fn test_delete_and_rollback() {
        let mut storage = MemoryStorage::new();
        storage.put(b"block:1", b"b1");
        storage.commit().unwrap();

        storage.delete(b"block:1");
        assert!(!storage.exists(b"block:1"));
        storage.rollback();
        assert!(storage.exists(b"block:1"));

        storage.delete(b"block:1");
        storage.commit().unwrap();
        assert!(!storage.exists(b"block:1"));
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn test_prefix_query_merges_staged_writes() {
        let mut storage = MemoryStorage::new();
        storage.put(b"validators:1", b"a");
        storage.put(b"validators:2", b"b");
        storage.put(b"consensus_params:1", b"p");
        storage.commit().unwrap();

        storage.delete(b"validators:1");
        storage.put(b"validators:3", b"c");

        let keys = storage.keys_with_prefix(b"validators:");
        assert_eq!(keys, vec![b"validators:2".to_vec(), b"validators:3".to_vec()]);
    }

    #[test]
    fn test_typed_load_and_stage() {
        let mut storage = MemoryStorage::new();
        stage(&mut storage, "numbers", &vec![1u64, 2, 3]).unwrap();
        storage.commit().unwrap();

        let numbers: Option<Vec<u64>> = load(&storage, "numbers").unwrap();
        assert_eq!(numbers, Some(vec![1, 2, 3]));
        let missing: Option<Vec<u64>> = load(&storage, "missing").unwrap();
        assert!(missing.is_none());

        storage.put(b"garbage", &[0xff]);
        assert!(load::<Vec<u64>>(&storage, "garbage").is_err());
    }
}
