//! Distributed Entity Locks
//!
//! Per-identity, TTL-bounded mutual exclusion for writers that opt in.
//! Acquisition is one atomic set-if-absent on the lock key and fails fast:
//! callers treat `None` as "proceed without the lock". Caching is advisory,
//! so lock acquisition never blocks the primary write path. The TTL bounds
//! how long a crashed holder can keep others out.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::identity::EntityKey;
use crate::error::Result;

use super::gateway::StoreGateway;
use super::keys::KeyFactory;
use super::metrics::CacheMetrics;

/// A held lock. Carries the random token that proves ownership; release
/// consumes the guard so a lock cannot be released twice.
#[derive(Debug)]
pub struct EntityLock {
    key: EntityKey,
    lock_key: String,
    token: String,
    ttl: Duration,
}

impl EntityLock {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Acquires and releases entity locks against the backing store.
#[derive(Clone)]
pub struct LockService {
    gateway: StoreGateway,
    keys: KeyFactory,
    ttl: Duration,
    metrics: Arc<CacheMetrics>,
}

impl LockService {
    pub fn new(
        gateway: StoreGateway,
        keys: KeyFactory,
        ttl: Duration,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            gateway,
            keys,
            ttl,
            metrics,
        }
    }

    /// Try to acquire the lock for an entity. Fail-fast: `None` means the
    /// lock is held elsewhere or the store is unreachable, and the caller
    /// proceeds without it.
    pub async fn acquire(&self, key: &EntityKey) -> Option<EntityLock> {
        let lock_key = self.keys.lock_key(key);
        let token = Uuid::new_v4().to_string();

        match self
            .gateway
            .set_if_absent(&lock_key, Bytes::from(token.clone()), self.ttl)
            .await
        {
            Ok(true) => {
                self.metrics.record_lock_acquired();
                Some(EntityLock {
                    key: key.clone(),
                    lock_key,
                    token,
                    ttl: self.ttl,
                })
            }
            Ok(false) => {
                self.metrics.record_lock_contention();
                debug!(entity = %key, "lock already held, proceeding without it");
                None
            }
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(entity = %key, error = %e, "lock acquisition failed, proceeding without it");
                None
            }
        }
    }

    /// Release a held lock. The stored token must still match the guard's;
    /// a lock that expired and was re-acquired by another writer is left
    /// alone. Token check and delete are two separate store calls.
    pub async fn release(&self, lock: EntityLock) -> bool {
        match self.try_release(&lock).await {
            Ok(released) => {
                if !released {
                    debug!(
                        entity = %lock.key,
                        "lock no longer held by this token, nothing released"
                    );
                }
                released
            }
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(entity = %lock.key, error = %e, "lock release failed");
                false
            }
        }
    }

    async fn try_release(&self, lock: &EntityLock) -> Result<bool> {
        let current = self.gateway.get(&lock.lock_key).await?;
        match current {
            Some(bytes) if bytes.as_ref() == lock.token.as_bytes() => {
                self.gateway.delete_key(&lock.lock_key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Delete an entity's lock key unconditionally, whoever holds it.
    pub async fn force_unlock(&self, key: &EntityKey) -> bool {
        let lock_key = self.keys.lock_key(key);
        match self.gateway.delete_key(&lock_key).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(entity = %key, error = %e, "unlock failed");
                false
            }
        }
    }
}
