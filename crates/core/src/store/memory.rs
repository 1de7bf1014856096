//! The default, always-available persistence backend: an in-process map.
//!
//! This backend exists to give [`crate::store::Store`] a concrete, always
//! compiled-in implementation, not because MobWrite's in-memory state needs
//! a second copy of itself — a server built with no persistence
//! configured simply doesn't survive restarts, which is an acceptable
//! default per §3's lifecycle rules.

use dashmap::DashMap;

use crate::error::StoreError;
use crate::store::{BufferRecord, Store, TextRecord};
use crate::view::ViewRecord;

/// An in-memory [`Store`] backed by [`DashMap`]s, keyed the same way the
/// live registries are.
#[derive(Default)]
pub struct MemoryStore {
    texts: DashMap<String, TextRecord>,
    views: DashMap<(String, String), ViewRecord>,
    buffers: DashMap<(String, usize), BufferRecord>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn save_text(&self, name: &str, record: &TextRecord) -> Result<(), StoreError> {
        self.texts.insert(name.to_string(), record.clone());
        Ok(())
    }

    fn load_text(&self, name: &str) -> Result<Option<TextRecord>, StoreError> {
        Ok(self.texts.get(name).map(|entry| entry.clone()))
    }

    fn delete_text(&self, name: &str) -> Result<(), StoreError> {
        self.texts.remove(name);
        Ok(())
    }

    fn save_view(&self, username: &str, doc_name: &str, record: &ViewRecord) -> Result<(), StoreError> {
        self.views
            .insert((username.to_string(), doc_name.to_string()), record.clone());
        Ok(())
    }

    fn load_view(&self, username: &str, doc_name: &str) -> Result<Option<ViewRecord>, StoreError> {
        Ok(self
            .views
            .get(&(username.to_string(), doc_name.to_string()))
            .map(|entry| entry.clone()))
    }

    fn delete_view(&self, username: &str, doc_name: &str) -> Result<(), StoreError> {
        self.views.remove(&(username.to_string(), doc_name.to_string()));
        Ok(())
    }

    fn save_buffer(&self, name: &str, record: &BufferRecord) -> Result<(), StoreError> {
        self.buffers.insert((name.to_string(), record.size), record.clone());
        Ok(())
    }

    fn load_buffer(&self, name: &str, size: usize) -> Result<Option<BufferRecord>, StoreError> {
        Ok(self.buffers.get(&(name.to_string(), size)).map(|entry| entry.clone()))
    }

    fn delete_buffer(&self, name: &str, size: usize) -> Result<(), StoreError> {
        self.buffers.remove(&(name.to_string(), size));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn round_trips_a_text_record() {
        let store = MemoryStore::new();
        let record = TextRecord {
            text: Some("Hello".to_string()),
            last_modified: SystemTime::now(),
        };
        store.save_text("doc", &record).unwrap();
        assert_eq!(store.load_text("doc").unwrap(), Some(record));
    }

    #[test]
    fn delete_removes_a_persisted_view() {
        let store = MemoryStore::new();
        let record = ViewRecord {
            shadow: String::new(),
            backup_shadow: String::new(),
            shadow_client_version: 0,
            shadow_server_version: 0,
            backup_shadow_server_version: 0,
            edit_stack: Vec::new(),
        };
        store.save_view("alice", "doc", &record).unwrap();
        store.delete_view("alice", "doc").unwrap();
        assert_eq!(store.load_view("alice", "doc").unwrap(), None);
    }
}
