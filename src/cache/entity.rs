//! Entity Cache Manager
//!
//! Write-through caching of single entities and identity-list collections.
//! Every steady-state operation here is fail-open: internal failures are
//! logged and become a miss or a no-op, because the cache decorates the
//! primary store's read and write paths and must never break them.
//!
//! Reads self-heal: an entry that fails integrity verification, fails to
//! parse, or was sealed for a different type is deleted on sight and
//! reported as a miss.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::codec::integrity::IntegrityCodec;
use crate::codec::wire::{self, InFlight};
use crate::config::CacheSettings;
use crate::domain::graph::EntityGraph;
use crate::domain::identity::{EntityKey, Identity, TypeTag};
use crate::domain::ports::{EntityStore, KeyValueStore};
use crate::error::{Error, Result};
use crate::registry::{CachePolicy, CacheRegistry};

use super::gateway::StoreGateway;
use super::keys::{CollectionScope, KeyFactory};
use super::lock::{EntityLock, LockService};
use super::metrics::CacheMetrics;

/// Cache manager for single entities and per-type collections.
pub struct EntityCacheManager {
    gateway: StoreGateway,
    entities: Arc<dyn EntityStore>,
    registry: Arc<CacheRegistry>,
    settings: CacheSettings,
    keys: KeyFactory,
    codec: IntegrityCodec,
    locks: LockService,
    metrics: Arc<CacheMetrics>,
}

impl EntityCacheManager {
    /// Wire up a manager over the given ports. Fails only on invalid
    /// settings; the backing stores are not contacted.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        entities: Arc<dyn EntityStore>,
        registry: Arc<CacheRegistry>,
        settings: CacheSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let gateway = StoreGateway::new(store, settings.scan_page_size);
        let keys = KeyFactory::new(settings.key_prefix.clone());
        let codec = IntegrityCodec::new(settings.secret_key.clone());
        let metrics = Arc::new(CacheMetrics::new());
        let locks = LockService::new(
            gateway.clone(),
            keys.clone(),
            settings.lock_ttl,
            metrics.clone(),
        );

        Ok(Self {
            gateway,
            entities,
            registry,
            settings,
            keys,
            codec,
            locks,
            metrics,
        })
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn is_cacheable(&self, type_tag: &TypeTag) -> bool {
        self.registry.is_cacheable(type_tag)
    }

    pub fn policy(&self, type_tag: &TypeTag) -> Option<&CachePolicy> {
        self.registry.policy(type_tag)
    }

    pub(crate) fn keys(&self) -> &KeyFactory {
        &self.keys
    }

    pub(crate) fn codec(&self) -> &IntegrityCodec {
        &self.codec
    }

    pub(crate) fn gateway(&self) -> &StoreGateway {
        &self.gateway
    }

    // -------------------------------------------------------------------------
    // Single entities
    // -------------------------------------------------------------------------

    /// Cache the record stored under `key` in `graph`, together with its
    /// reachable references. No-op when the type is not cacheable or the
    /// record is absent from the graph. Never raises.
    pub async fn put(&self, graph: &EntityGraph, key: &EntityKey) {
        let Some(policy) = self.registry.policy(&key.type_tag) else {
            debug!(entity = %key, "type not cacheable, skipping put");
            return;
        };
        if !graph.contains(key) {
            debug!(entity = %key, "record not present in graph, skipping put");
            return;
        }

        let payload = match wire::encode(graph, key) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(entity = %key, error = %e, "encode failed, entry not cached");
                return;
            }
        };
        let sealed = self.codec.seal(payload, &key.type_tag);
        let bytes = match sealed.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(entity = %key, error = %e, "envelope serialization failed, entry not cached");
                return;
            }
        };

        let cache_key = self.keys.entity_key(key);
        let ttl = policy.effective_ttl(self.settings.default_ttl);
        self.write_entry(&cache_key, bytes, ttl).await;
    }

    /// Fetch an entity from the cache into `graph`. `None` on miss, on any
    /// store failure, and on corrupt entries (which are deleted first).
    pub async fn get(
        &self,
        type_tag: &TypeTag,
        identity: &Identity,
        graph: &mut EntityGraph,
    ) -> Option<EntityKey> {
        let mut in_flight = InFlight::new();
        self.get_guarded(type_tag, identity, graph, &mut in_flight).await
    }

    /// `get` with an explicit in-flight set. A key already being loaded in
    /// this call chain returns `None` instead of recursing.
    pub(crate) async fn get_guarded(
        &self,
        type_tag: &TypeTag,
        identity: &Identity,
        graph: &mut EntityGraph,
        in_flight: &mut InFlight,
    ) -> Option<EntityKey> {
        let key = EntityKey::new(type_tag.clone(), identity.clone());
        if in_flight.contains(&key) {
            debug!(entity = %key, "load already in flight, not recursing");
            return None;
        }

        let cache_key = self.keys.entity_key(&key);
        let raw = match self.gateway.get(&cache_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.metrics.record_entity_miss();
                return None;
            }
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(entity = %key, error = %e, "cache read failed, treating as miss");
                self.metrics.record_entity_miss();
                return None;
            }
        };

        let payload = match self.codec.unseal(&raw, type_tag) {
            Ok(payload) => payload,
            Err(e) => {
                self.heal_corrupt(&cache_key, &e).await;
                self.metrics.record_entity_miss();
                return None;
            }
        };

        in_flight.insert(key.clone());
        let decoded = wire::decode(
            &payload,
            type_tag,
            graph,
            self.entities.as_ref(),
            in_flight,
        )
        .await;
        in_flight.remove(&key);

        match decoded {
            Ok(root) => {
                self.metrics.record_entity_hit();
                self.register_with_store(graph, &root).await;
                Some(root)
            }
            Err(e) => {
                self.heal_corrupt(&cache_key, &e).await;
                self.metrics.record_entity_miss();
                None
            }
        }
    }

    /// Re-attach a cache-sourced record to the persistence layer's change
    /// tracking. Best-effort: failure is logged and the record still served.
    async fn register_with_store(&self, graph: &EntityGraph, key: &EntityKey) {
        let Some(record) = graph.entity(key) else {
            return;
        };
        if let Err(e) = self.entities.register_as_managed(record).await {
            warn!(entity = %key, error = %e, "change-tracking registration failed, serving record anyway");
        }
    }

    /// Delete an entity's cache entry. Idempotent.
    pub async fn invalidate(&self, key: &EntityKey) {
        let cache_key = self.keys.entity_key(key);
        self.invalidate_cache_key(&cache_key).await;
    }

    /// Delete by raw cache key. Used as the removal fallback when an
    /// entity's identity is no longer extractable after deletion.
    pub async fn invalidate_cache_key(&self, raw_key: &str) {
        match self.gateway.delete_key(raw_key).await {
            Ok(removed) => {
                if removed > 0 {
                    self.metrics.record_invalidated(removed);
                }
            }
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(key = raw_key, error = %e, "invalidation failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Locks
    // -------------------------------------------------------------------------

    /// Acquire the entity's write lock. `None` when the type is not
    /// cacheable, the lock is contended, or the store is unreachable;
    /// callers proceed without the lock in every case.
    pub async fn lock(&self, key: &EntityKey) -> Option<EntityLock> {
        if !self.registry.is_cacheable(&key.type_tag) {
            debug!(entity = %key, "type not cacheable, no lock taken");
            return None;
        }
        self.locks.acquire(key).await
    }

    /// Release a held lock, verifying the token still matches.
    pub async fn release(&self, lock: EntityLock) -> bool {
        self.locks.release(lock).await
    }

    /// Drop an entity's lock unconditionally.
    pub async fn unlock(&self, key: &EntityKey) -> bool {
        self.locks.force_unlock(key).await
    }

    // -------------------------------------------------------------------------
    // Collections
    // -------------------------------------------------------------------------

    /// Cache the member list for a collection scope. Stores identities
    /// only; member payloads live in their own entity entries.
    pub async fn put_collection(
        &self,
        members: &[EntityKey],
        type_tag: &TypeTag,
        scope: &CollectionScope,
    ) {
        let Some(policy) = self.registry.policy(type_tag) else {
            debug!(%type_tag, "type not cacheable, skipping collection put");
            return;
        };

        let identities: Vec<String> = members
            .iter()
            .map(|key| key.identity.as_str().to_string())
            .collect();
        let sealed = self.codec.seal_index(type_tag, &scope.token(), identities);
        let bytes = match sealed.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(%type_tag, error = %e, "index serialization failed, collection not cached");
                return;
            }
        };

        let cache_key = self.keys.collection_key(type_tag, scope);
        let ttl = policy.effective_ttl(self.settings.default_ttl);
        self.write_entry(&cache_key, bytes, ttl).await;
    }

    /// Fetch a cached collection, rehydrating each member into `graph`.
    /// Members missing from both the entity cache and the backing store are
    /// dropped from the result, never an error. The scope's window is
    /// re-applied to the rehydrated list to guard against drift.
    pub async fn get_collection(
        &self,
        type_tag: &TypeTag,
        scope: &CollectionScope,
        graph: &mut EntityGraph,
    ) -> Option<Vec<EntityKey>> {
        let cache_key = self.keys.collection_key(type_tag, scope);
        let raw = match self.gateway.get(&cache_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.metrics.record_collection_miss();
                return None;
            }
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(%type_tag, error = %e, "collection read failed, treating as miss");
                self.metrics.record_collection_miss();
                return None;
            }
        };

        let identities = match self.codec.unseal_index(&raw, type_tag, &scope.token()) {
            Ok(identities) => identities,
            Err(e) => {
                self.heal_corrupt(&cache_key, &e).await;
                self.metrics.record_collection_miss();
                return None;
            }
        };
        self.metrics.record_collection_hit();

        let members = self.rehydrate_members(type_tag, &identities, graph).await;
        Some(apply_window(members, scope.offset(), scope.limit()))
    }

    /// Delete every collection entry for a type.
    pub async fn invalidate_collection_caches(&self, type_tag: &TypeTag) {
        let pattern = self.keys.collection_pattern(Some(type_tag));
        match self.gateway.delete_matching(&pattern).await {
            Ok(removed) => {
                if removed > 0 {
                    self.metrics.record_invalidated(removed);
                }
                debug!(%type_tag, removed, "collection caches invalidated");
            }
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(%type_tag, error = %e, "collection invalidation failed");
            }
        }
    }

    /// Resolve an identity list back to graph records: entity cache first,
    /// then the backing store (re-populating the cache), dropping members
    /// found in neither.
    pub(crate) async fn rehydrate_members(
        &self,
        type_tag: &TypeTag,
        identities: &[String],
        graph: &mut EntityGraph,
    ) -> Vec<EntityKey> {
        let mut in_flight = InFlight::new();
        let mut members = Vec::with_capacity(identities.len());

        for raw_identity in identities {
            let identity = Identity::from_raw(raw_identity.clone());
            if let Some(key) = self
                .get_guarded(type_tag, &identity, graph, &mut in_flight)
                .await
            {
                members.push(key);
                continue;
            }

            match self.entities.load_by_identity(type_tag, &identity).await {
                Ok(Some(record)) => {
                    if let Some(key) = graph.insert(record) {
                        // Re-populate the entity cache for the next reader.
                        self.put(graph, &key).await;
                        members.push(key);
                    }
                }
                Ok(None) => {
                    debug!(%type_tag, identity = %identity, "member gone from cache and store, dropped");
                }
                Err(e) => {
                    self.metrics.record_store_failure();
                    warn!(%type_tag, identity = %identity, error = %e, "member load failed, dropped");
                }
            }
        }
        members
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Store an envelope and apply its TTL, logging instead of raising.
    pub(crate) async fn write_entry(&self, cache_key: &str, bytes: Bytes, ttl: Duration) {
        if let Err(e) = self.gateway.set(cache_key, bytes).await {
            self.metrics.record_store_failure();
            warn!(key = cache_key, error = %e, "cache write failed, entry skipped");
            return;
        }
        if let Err(e) = self.gateway.expire(cache_key, ttl).await {
            self.metrics.record_store_failure();
            warn!(key = cache_key, error = %e, "applying TTL failed, entry left as written");
        }
    }

    /// Delete a corrupt entry and account for the self-heal.
    pub(crate) async fn heal_corrupt(&self, cache_key: &str, cause: &Error) {
        let corrupt = Error::Corrupt {
            key: cache_key.to_string(),
            reason: cause.to_string(),
        };
        warn!(error = %corrupt, "corrupt cache entry, deleting");
        self.metrics.record_corruption_heal();
        if let Err(e) = self.gateway.delete_key(cache_key).await {
            self.metrics.record_store_failure();
            warn!(key = cache_key, error = %e, "failed to delete corrupt entry");
        }
    }
}

/// Re-apply a scope's window after rehydration.
fn apply_window(
    members: Vec<EntityKey>,
    offset: Option<usize>,
    limit: Option<usize>,
) -> Vec<EntityKey> {
    let mut out: Vec<EntityKey> = match offset {
        Some(offset) => members.into_iter().skip(offset).collect(),
        None => members,
    };
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out
}
