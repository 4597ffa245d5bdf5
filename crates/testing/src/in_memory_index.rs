//! An in-process [`IndexSink`] fake, mirroring the set semantics of the
//! Redis-backed sink without a network round trip.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use smarterbase_core::{IndexSink, StoreResult};

#[derive(Clone, Default)]
pub struct InMemoryIndexSink {
    sets: Arc<Mutex<HashMap<(String, String, String), HashSet<String>>>>,
}

impl InMemoryIndexSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_key(entity_type: &str, index_name: &str, value: &str) -> (String, String, String) {
        (entity_type.to_string(), index_name.to_string(), value.to_string())
    }
}

impl IndexSink for InMemoryIndexSink {
    async fn add_member(&self, entity_type: &str, index_name: &str, value: &str, key: &str) -> StoreResult<()> {
        self.sets
            .lock()
            .unwrap()
            .entry(Self::set_key(entity_type, index_name, value))
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn remove_member(&self, entity_type: &str, index_name: &str, value: &str, key: &str) -> StoreResult<()> {
        if let Some(set) = self.sets.lock().unwrap().get_mut(&Self::set_key(entity_type, index_name, value)) {
            set.remove(key);
        }
        Ok(())
    }

    async fn query(&self, entity_type: &str, index_name: &str, value: &str) -> StoreResult<HashSet<String>> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(&Self::set_key(entity_type, index_name, value))
            .cloned()
            .unwrap_or_default())
    }

    async fn count(&self, entity_type: &str, index_name: &str, value: &str) -> StoreResult<u64> {
        Ok(self.query(entity_type, index_name, value).await?.len() as u64)
    }
}
