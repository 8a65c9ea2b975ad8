//! In-memory key-value store for tests and oneshot wiring

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::Mutex;

use super::KeyValueStore;

/// Non-durable store with the same semantics as the SQLite backend.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock();
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(
            (namespace.to_string(), key.to_string()),
            value.to_string(),
        );
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock();
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn compare_and_swap(
        &self,
        namespace: &str,
        key: &str,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool> {
        let mut entries = self.entries.lock();
        let slot = (namespace.to_string(), key.to_string());
        if entries.get(&slot).map(String::as_str) != expected {
            return Ok(false);
        }
        match value {
            Some(v) => {
                entries.insert(slot, v.to_string());
            }
            None => {
                entries.remove(&slot);
            }
        }
        Ok(true)
    }
}
