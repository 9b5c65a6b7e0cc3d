pub mod memory;
pub mod persistent;

use std::collections::BTreeMap;

use halcyon_core::serialize;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StateError;

/// Key-value persistence used by the state and block stores.
///
/// Writes are staged until `commit`, which applies them all at once.
pub trait Storage: Send + Sync {
    /// Get a value by key, staged writes included
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn put(&mut self, key: &[u8], value: &[u8]);

    fn delete(&mut self, key: &[u8]);

    /// Apply staged writes
    fn commit(&mut self) -> Result<(), StateError>;

    /// Drop staged writes
    fn rollback(&mut self);

    fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>>;
}

/// Decode the value stored under `key`.
pub fn load<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, StateError> {
    match storage.get(key.as_bytes()) {
        Some(bytes) => serialize::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| StateError::Serialization(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

/// Stage `value` under `key`; nothing is durable until `commit`.
pub fn stage<T: Serialize>(storage: &mut dyn Storage, key: &str, value: &T) -> Result<(), StateError> {
    let bytes = serialize::to_bytes(value)
        .map_err(|e| StateError::Serialization(format!("{}: {}", key, e)))?;
    storage.put(key.as_bytes(), &bytes);
    Ok(())
}

/// Committed data plus the writes staged on top of it. Both engines keep
/// one of these; the file engine also flushes `data` on commit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Overlay {
    pub(crate) data: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Overlay {
    pub(crate) fn with_data(data: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Overlay {
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

    pub(crate) fn put(&mut self, key: &[u8], value: &[u8]) {
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
    }

    pub(crate) fn delete(&mut self, key: &[u8]) {
        self.pending.insert(key.to_vec(), None);
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

    pub(crate) fn rollback(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| !matches!(self.pending.get(*key), Some(None)))
            .map(|(key, _)| key.clone())
            .collect();

        for (key, value) in self.pending.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if value.is_some() && !self.data.contains_key(key) {
                keys.push(key.clone());
            }
        }
        keys.sort();
        keys
    }
}

pub use memory::MemoryStorage;
pub use persistent::FileStorage;
