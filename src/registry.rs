//! Cacheability Registry
//!
//! Which entity types are cached, and how, is declared once at startup and
//! queried by value afterwards. A type absent from the registry is simply
//! not cacheable; reads for it fall through to the backing store and writes
//! are no-ops.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::identity::TypeTag;

/// Caching behavior for one entity type.
#[derive(Debug, Clone, Default)]
pub struct CachePolicy {
    /// Entry TTL. `None` falls back to the configured default TTL.
    ttl: Option<Duration>,
    /// Acquire the entity's lock while a transaction writes it.
    lock_on_write: bool,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_lock_on_write(mut self, lock_on_write: bool) -> Self {
        self.lock_on_write = lock_on_write;
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn lock_on_write(&self) -> bool {
        self.lock_on_write
    }

    /// TTL to apply to stored entries, given the configured default.
    pub fn effective_ttl(&self, default_ttl: Duration) -> Duration {
        self.ttl.unwrap_or(default_ttl)
    }
}

/// Type-to-policy mapping, built once at startup.
#[derive(Debug, Default)]
pub struct CacheRegistry {
    policies: HashMap<TypeTag, CachePolicy>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type cacheable under the given policy.
    pub fn register(mut self, type_tag: TypeTag, policy: CachePolicy) -> Self {
        self.policies.insert(type_tag, policy);
        self
    }

    pub fn is_cacheable(&self, type_tag: &TypeTag) -> bool {
        self.policies.contains_key(type_tag)
    }

    pub fn policy(&self, type_tag: &TypeTag) -> Option<&CachePolicy> {
        self.policies.get(type_tag)
    }

    pub fn registered_types(&self) -> impl Iterator<Item = &TypeTag> {
        self.policies.keys()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
