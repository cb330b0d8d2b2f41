use std::collections::HashMap;
use std::sync::Mutex;

use super::{KeyValueStore, KvWrite};
use crate::error::StoreError;

/// In-process store. Batches are applied under a single lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored pair, for assertions and status dumps.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn write_batch(&self, writes: &[KvWrite]) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        for write in writes {
            match write {
                KvWrite::Set { key, value } => {
                    values.insert(key.clone(), value.clone());
                }
                KvWrite::Remove { key } => {
                    values.remove(key);
                }
            }
        }
        Ok(())
    }
}
