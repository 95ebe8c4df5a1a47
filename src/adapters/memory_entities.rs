//! In-Memory Entity Store Adapter
//!
//! Test double for the [`EntityStore`] port: a seeded record set standing in
//! for the persistence layer's primary store, with hooks to simulate store
//! outage and registration failure, and a log of which records were
//! re-registered for change tracking.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::domain::graph::EntityRecord;
use crate::domain::identity::{EntityKey, Identity, TypeTag};
use crate::domain::ports::EntityStore;
use crate::error::{Error, Result};

/// In-memory [`EntityStore`] backed by a seeded record map.
#[derive(Default)]
pub struct InMemoryEntityStore {
    records: DashMap<EntityKey, EntityRecord>,
    registered: Mutex<Vec<EntityKey>>,
    unavailable: AtomicBool,
    fail_registration: AtomicBool,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record, keyed by its identity. Records without an identity are
    /// ignored, mirroring a store that cannot address them.
    pub fn seed(&self, record: EntityRecord) {
        if let Some(key) = record.key() {
            self.records.insert(key, record);
        }
    }

    /// Remove a record, simulating deletion from the primary store.
    pub fn remove(&self, key: &EntityKey) -> bool {
        self.records.remove(key).is_some()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.records.contains_key(key)
    }

    /// Keys passed to `register_as_managed`, in call order.
    pub fn registered_keys(&self) -> Vec<EntityKey> {
        self.registered.lock().clone()
    }

    /// Make every load fail with a store error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `register_as_managed` fail while loads keep working.
    pub fn set_fail_registration(&self, fail: bool) {
        self.fail_registration.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn load_by_identity(
        &self,
        type_tag: &TypeTag,
        identity: &Identity,
    ) -> Result<Option<EntityRecord>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Persistence(
                "in-memory entity store marked unavailable".to_string(),
            ));
        }
        let key = EntityKey::new(type_tag.clone(), identity.clone());
        Ok(self.records.get(&key).map(|entry| entry.value().clone()))
    }

    async fn register_as_managed(&self, record: &EntityRecord) -> Result<()> {
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(Error::Persistence(
                "change-tracking registration rejected".to_string(),
            ));
        }
        if let Some(key) = record.key() {
            self.registered.lock().push(key);
        }
        Ok(())
    }
}
