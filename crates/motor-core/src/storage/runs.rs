//! Run record CRUD and the single-active-run slot

use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::KeyValueStore;
use crate::run::types::{Run, RunFilter};

const NS_RUNS: &str = "runs";
const NS_LOCKS: &str = "locks";
const ACTIVE_KEY: &str = "active_run";

/// Typed access to persisted runs.
///
/// The active-run slot is a compare-and-swap on the underlying store rather
/// than an in-memory lock: the check-and-create must hold across process
/// restarts.
#[derive(Clone)]
pub struct RunStore {
    store: Arc<dyn KeyValueStore>,
}

impl RunStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, run: &Run) -> Result<()> {
        let json = serde_json::to_string(run)?;
        self.store.put(NS_RUNS, &run.id, &json)
    }

    pub fn load(&self, run_id: &str) -> Result<Option<Run>> {
        match self.store.get(NS_RUNS, run_id)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, run_id: &str) -> Result<Run> {
        self.load(run_id)?
            .ok_or_else(|| anyhow!("run not found: {run_id}"))
    }

    pub fn list(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        for key in self.store.list_keys(NS_RUNS)? {
            if let Some(run) = self.load(&key)? {
                if filter.status.is_none_or(|s| run.status == s) {
                    runs.push(run);
                }
            }
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Claim the system-wide active slot for `run_id`.
    ///
    /// A run that already holds the slot may re-claim it (self-retry).
    pub fn try_acquire_active(&self, run_id: &str) -> Result<bool> {
        if self
            .store
            .compare_and_swap(NS_LOCKS, ACTIVE_KEY, None, Some(run_id))?
        {
            return Ok(true);
        }
        Ok(self.active_run_id()?.as_deref() == Some(run_id))
    }

    /// Release the slot if `run_id` holds it. Idempotent.
    pub fn release_active(&self, run_id: &str) -> Result<()> {
        self.store
            .compare_and_swap(NS_LOCKS, ACTIVE_KEY, Some(run_id), None)?;
        Ok(())
    }

    pub fn active_run_id(&self) -> Result<Option<String>> {
        self.store.get(NS_LOCKS, ACTIVE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn active_slot_is_exclusive_but_reentrant() {
        let store = RunStore::new(Arc::new(MemoryStore::new()));

        assert!(store.try_acquire_active("run_a").unwrap());
        assert!(!store.try_acquire_active("run_b").unwrap());
        // Self-retry of the holder is exempt from the mutex.
        assert!(store.try_acquire_active("run_a").unwrap());

        store.release_active("run_a").unwrap();
        assert!(store.try_acquire_active("run_b").unwrap());
    }

    #[test]
    fn release_by_non_holder_is_a_noop() {
        let store = RunStore::new(Arc::new(MemoryStore::new()));
        assert!(store.try_acquire_active("run_a").unwrap());
        store.release_active("run_b").unwrap();
        assert_eq!(store.active_run_id().unwrap().as_deref(), Some("run_a"));
    }
}
