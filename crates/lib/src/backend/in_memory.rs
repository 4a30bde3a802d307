//! In-memory state store built on two-level locking.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{Result, backend::StoreError};

use super::StateStore;

/// An in-memory [`StateStore`] suitable for production single-process use
/// and for tests.
///
/// Records are held as `Arc<RwLock<V>>` inside an outer map guarded by its
/// own `RwLock`. The outer lock is only taken long enough to resolve a key
/// to its record handle, so mutations against different keys proceed in
/// parallel while same-key mutations serialize on the record lock.
#[derive(Debug)]
pub struct InMemoryStore<V> {
    records: RwLock<HashMap<String, Arc<RwLock<V>>>>,
}

impl<V> InMemoryStore<V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn handle(&self, key: &str) -> Option<Arc<RwLock<V>>> {
        self.records.read().unwrap().get(key).cloned()
    }
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> StateStore<V> for InMemoryStore<V> {
    fn insert_new(&self, key: &str, value: V) -> Result<()> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(key) {
            return Err(StoreError::DuplicateKey {
                key: key.to_string(),
            }
            .into());
        }
        records.insert(key.to_string(), Arc::new(RwLock::new(value)));
        Ok(())
    }

    fn get(&self, key: &str) -> Option<V> {
        self.handle(key).map(|record| record.read().unwrap().clone())
    }

    fn contains(&self, key: &str) -> bool {
        self.records.read().unwrap().contains_key(key)
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(&mut V)) -> bool {
        match self.handle(key) {
            Some(record) => {
                let mut guard = record.write().unwrap();
                f(&mut guard);
                true
            }
            None => false,
        }
    }

    fn update_or_insert(
        &self,
        key: &str,
        default: &mut dyn FnMut() -> V,
        f: &mut dyn FnMut(&mut V),
    ) {
        let record = {
            let mut records = self.records.write().unwrap();
            records
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(default())))
                .clone()
        };
        let mut guard = record.write().unwrap();
        f(&mut guard);
    }

    fn remove(&self, key: &str) -> Option<V> {
        self.records
            .write()
            .unwrap()
            .remove(key)
            .map(|record| record.read().unwrap().clone())
    }

    fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    fn keys(&self) -> Vec<String> {
        self.records.read().unwrap().keys().cloned().collect()
    }

    fn snapshot(&self) -> Vec<(String, V)> {
        self.records
            .read()
            .unwrap()
            .iter()
            .map(|(key, record)| (key.clone(), record.read().unwrap().clone()))
            .collect()
    }
}
