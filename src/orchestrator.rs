//! Invalidation Orchestrator
//!
//! Bridges persistence-layer lifecycle events to the cache. One orchestrator
//! tracks one logical transaction at a time, moving through
//! `Idle -> Accumulating -> Flushing -> Idle`:
//!
//! - Pre-write hooks snapshot the entity, record its type, and take the
//!   write lock when the type's policy asks for one.
//! - Post-write hooks re-cache immediately and invalidate the type's
//!   collection and query caches, shrinking the window in which another
//!   process can read a stale list.
//! - `commit` replays the accumulated work once more: re-caches final
//!   entity states, flushes removals, repeats the type-level invalidation
//!   (idempotent, covers an immediate pass that failed transiently), and
//!   releases every held lock.
//!
//! Every hook is fail-open. A cache or lock problem never surfaces to the
//! surrounding business transaction.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::entity::EntityCacheManager;
use crate::cache::lock::EntityLock;
use crate::cache::query::QueryCacheManager;
use crate::domain::graph::EntityGraph;
use crate::domain::identity::{EntityKey, TypeTag};

/// Where the current transaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionPhase {
    #[default]
    Idle,
    Accumulating,
    Flushing,
}

#[derive(Default)]
struct TransactionState {
    phase: TransactionPhase,
    /// Subgraph snapshots to re-cache at commit, latest write wins.
    upserts: BTreeMap<EntityKey, EntityGraph>,
    /// Removals to flush, with the cache key prebuilt while the record
    /// was still whole.
    removals: BTreeMap<EntityKey, String>,
    /// Types needing one more collection/query invalidation at commit.
    touched_types: BTreeSet<TypeTag>,
    held_locks: Vec<EntityLock>,
    locked_keys: HashSet<EntityKey>,
}

impl TransactionState {
    fn begin_if_idle(&mut self) {
        if self.phase == TransactionPhase::Idle {
            self.phase = TransactionPhase::Accumulating;
        }
    }

    fn take_accumulated(&mut self) -> FlushWork {
        self.locked_keys.clear();
        FlushWork {
            upserts: mem::take(&mut self.upserts),
            removals: mem::take(&mut self.removals),
            touched_types: mem::take(&mut self.touched_types),
            held_locks: mem::take(&mut self.held_locks),
        }
    }
}

struct FlushWork {
    upserts: BTreeMap<EntityKey, EntityGraph>,
    removals: BTreeMap<EntityKey, String>,
    touched_types: BTreeSet<TypeTag>,
    held_locks: Vec<EntityLock>,
}

/// Lifecycle-event listener driving cache population and invalidation.
pub struct InvalidationOrchestrator {
    entities: Arc<EntityCacheManager>,
    queries: Arc<QueryCacheManager>,
    state: Mutex<TransactionState>,
}

impl InvalidationOrchestrator {
    pub fn new(entities: Arc<EntityCacheManager>, queries: Arc<QueryCacheManager>) -> Self {
        Self {
            entities,
            queries,
            state: Mutex::new(TransactionState::default()),
        }
    }

    pub fn phase(&self) -> TransactionPhase {
        self.state.lock().phase
    }

    pub fn pending_upserts(&self) -> usize {
        self.state.lock().upserts.len()
    }

    pub fn pending_removals(&self) -> usize {
        self.state.lock().removals.len()
    }

    // -------------------------------------------------------------------------
    // Lifecycle hooks
    // -------------------------------------------------------------------------

    /// An entity was loaded from the backing store. Populates the cache
    /// when auto-cache-on-load is configured; never transactional.
    pub async fn entity_loaded(&self, graph: &EntityGraph, key: &EntityKey) {
        if !self.entities.settings().auto_cache_on_load {
            return;
        }
        self.entities.put(graph, key).await;
    }

    /// An entity is about to be written. Snapshots it for commit-time
    /// re-caching and takes the write lock when the policy asks for one.
    pub async fn before_update(&self, graph: &EntityGraph, key: &EntityKey) {
        let Some(policy) = self.entities.policy(&key.type_tag) else {
            return;
        };
        let lock_wanted = policy.lock_on_write();
        let snapshot = graph.subgraph(key);

        let need_lock = {
            let mut state = self.state.lock();
            state.begin_if_idle();
            state.upserts.insert(key.clone(), snapshot);
            state.removals.remove(key);
            state.touched_types.insert(key.type_tag.clone());
            lock_wanted && !state.locked_keys.contains(key)
        };
        if need_lock {
            self.acquire_write_lock(key).await;
        }
    }

    /// An entity is about to be deleted. Records the removal and drops its
    /// cache entry now, while the identity is still known.
    pub async fn before_remove(&self, key: &EntityKey) {
        let Some(policy) = self.entities.policy(&key.type_tag) else {
            return;
        };
        let lock_wanted = policy.lock_on_write();
        let cache_key = self.entities.keys().entity_key(key);

        let need_lock = {
            let mut state = self.state.lock();
            state.begin_if_idle();
            state.upserts.remove(key);
            state.removals.insert(key.clone(), cache_key.clone());
            state.touched_types.insert(key.type_tag.clone());
            lock_wanted && !state.locked_keys.contains(key)
        };
        if need_lock {
            self.acquire_write_lock(key).await;
        }

        self.entities.invalidate_cache_key(&cache_key).await;
    }

    /// An entity was inserted and the store accepted it.
    pub async fn after_persist(&self, graph: &EntityGraph, key: &EntityKey) {
        self.record_write(graph, key).await;
    }

    /// An entity was updated and the store accepted it.
    pub async fn after_update(&self, graph: &EntityGraph, key: &EntityKey) {
        self.record_write(graph, key).await;
    }

    /// An entity was deleted from the store. Invalidates again (idempotent)
    /// and queues the type for the deferred invalidation pass.
    pub async fn after_remove(&self, key: &EntityKey) {
        if !self.entities.is_cacheable(&key.type_tag) {
            return;
        }
        let cache_key = self.entities.keys().entity_key(key);
        {
            let mut state = self.state.lock();
            state.begin_if_idle();
            state.upserts.remove(key);
            state
                .removals
                .entry(key.clone())
                .or_insert_with(|| cache_key.clone());
            state.touched_types.insert(key.type_tag.clone());
        }
        self.entities.invalidate_cache_key(&cache_key).await;
    }

    /// The transaction committed. Replays accumulated work and resets.
    pub async fn commit(&self) {
        let work = {
            let mut state = self.state.lock();
            if state.phase == TransactionPhase::Idle {
                return;
            }
            state.phase = TransactionPhase::Flushing;
            state.take_accumulated()
        };

        debug!(
            upserts = work.upserts.len(),
            removals = work.removals.len(),
            types = work.touched_types.len(),
            "flushing transaction"
        );

        // Final entity state wins over whatever the immediate passes wrote.
        for (key, graph) in &work.upserts {
            self.entities.put(graph, key).await;
        }
        for (key, cache_key) in &work.removals {
            debug!(entity = %key, "flushing removal");
            self.entities.invalidate_cache_key(cache_key).await;
        }
        for type_tag in &work.touched_types {
            self.entities.invalidate_collection_caches(type_tag).await;
            self.queries.invalidate_entity_query_caches(type_tag).await;
        }
        for lock in work.held_locks {
            self.entities.release(lock).await;
        }

        self.state.lock().phase = TransactionPhase::Idle;
    }

    /// The transaction rolled back. Drops accumulated work unflushed and
    /// releases held locks; entries invalidated by the immediate passes
    /// stay invalidated and reload from the store on next read.
    pub async fn rollback(&self) {
        let work = {
            let mut state = self.state.lock();
            let work = state.take_accumulated();
            state.phase = TransactionPhase::Idle;
            work
        };
        debug!(
            upserts = work.upserts.len(),
            removals = work.removals.len(),
            "transaction rolled back, dropping accumulated work"
        );
        for lock in work.held_locks {
            self.entities.release(lock).await;
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn record_write(&self, graph: &EntityGraph, key: &EntityKey) {
        if !self.entities.is_cacheable(&key.type_tag) {
            return;
        }

        // Immediate pass: read-after-write consistency for the common case.
        self.entities.put(graph, key).await;
        self.entities
            .invalidate_collection_caches(&key.type_tag)
            .await;
        self.queries
            .invalidate_entity_query_caches(&key.type_tag)
            .await;

        let mut state = self.state.lock();
        state.begin_if_idle();
        state.upserts.insert(key.clone(), graph.subgraph(key));
        state.removals.remove(key);
        state.touched_types.insert(key.type_tag.clone());
    }

    /// Best-effort lock acquisition. Contention or store trouble means the
    /// write proceeds unlocked.
    async fn acquire_write_lock(&self, key: &EntityKey) {
        if let Some(lock) = self.entities.lock(key).await {
            let mut state = self.state.lock();
            state.locked_keys.insert(key.clone());
            state.held_locks.push(lock);
        } else {
            debug!(entity = %key, "write lock not acquired, proceeding unlocked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapters::memory_entities::InMemoryEntityStore;
    use crate::adapters::memory_store::InMemoryKeyValueStore;
    use crate::cache::keys::CollectionScope;
    use crate::config::CacheSettings;
    use crate::domain::graph::EntityRecord;
    use crate::domain::identity::{Identity, TypeTag};
    use crate::registry::{CachePolicy, CacheRegistry};

    fn tag(name: &str) -> TypeTag {
        TypeTag::new(name).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryKeyValueStore>,
        entities: Arc<EntityCacheManager>,
        queries: Arc<QueryCacheManager>,
        orchestrator: InvalidationOrchestrator,
    }

    fn fixture_with(settings: CacheSettings) -> Fixture {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let backing = Arc::new(InMemoryEntityStore::new());
        let registry = CacheRegistry::new()
            .register(
                tag("Product"),
                CachePolicy::new().with_lock_on_write(true),
            )
            .register(tag("Customer"), CachePolicy::new());
        let entities = Arc::new(
            EntityCacheManager::new(store.clone(), backing, Arc::new(registry), settings).unwrap(),
        );
        let queries = Arc::new(QueryCacheManager::new(entities.clone()));
        let orchestrator = InvalidationOrchestrator::new(entities.clone(), queries.clone());
        Fixture {
            store,
            entities,
            queries,
            orchestrator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(CacheSettings::new("vc", b"test-secret".to_vec()))
    }

    fn product(id: i64, stock: i64) -> (EntityGraph, EntityKey) {
        let mut graph = EntityGraph::new();
        let key = graph
            .insert(
                EntityRecord::with_identity(tag("Product"), Identity::single(id))
                    .field("stock", stock),
            )
            .unwrap();
        (graph, key)
    }

    async fn cached_stock(fx: &Fixture, id: i64) -> Option<i64> {
        let mut out = EntityGraph::new();
        let key = fx
            .entities
            .get(&tag("Product"), &Identity::single(id), &mut out)
            .await?;
        out.entity(&key)?.get_field("stock")?.as_int()
    }

    #[tokio::test]
    async fn test_update_lifecycle() {
        let fx = fixture();
        let (graph, key) = product(1, 7);

        assert_eq!(fx.orchestrator.phase(), TransactionPhase::Idle);
        fx.orchestrator.before_update(&graph, &key).await;
        assert_eq!(fx.orchestrator.phase(), TransactionPhase::Accumulating);
        assert_eq!(fx.orchestrator.pending_upserts(), 1);

        fx.orchestrator.after_update(&graph, &key).await;
        // Immediate pass already cached the entity.
        assert_eq!(cached_stock(&fx, 1).await, Some(7));

        fx.orchestrator.commit().await;
        assert_eq!(fx.orchestrator.phase(), TransactionPhase::Idle);
        assert_eq!(fx.orchestrator.pending_upserts(), 0);
        assert_eq!(cached_stock(&fx, 1).await, Some(7));
    }

    #[tokio::test]
    async fn test_commit_recaches_final_state() {
        let fx = fixture();
        let (before, key) = product(1, 7);
        fx.orchestrator.before_update(&before, &key).await;

        let (after, _) = product(1, 3);
        fx.orchestrator.after_update(&after, &key).await;

        // Simulate the immediate re-cache being lost before commit.
        fx.entities.invalidate(&key).await;
        assert_eq!(cached_stock(&fx, 1).await, None);

        fx.orchestrator.commit().await;
        assert_eq!(cached_stock(&fx, 1).await, Some(3));
    }

    #[tokio::test]
    async fn test_write_invalidates_collections_and_queries() {
        let fx = fixture();
        let (graph, key) = product(1, 7);
        fx.entities.put(&graph, &key).await;

        let scope = CollectionScope::all();
        fx.entities
            .put_collection(&[key.clone()], &tag("Product"), &scope)
            .await;
        fx.queries
            .cache_query_result("featured", &[key.clone()], &tag("Product"), None)
            .await;

        let (updated, _) = product(1, 3);
        fx.orchestrator.after_update(&updated, &key).await;

        let mut out = EntityGraph::new();
        assert!(fx
            .entities
            .get_collection(&tag("Product"), &scope, &mut out)
            .await
            .is_none());
        assert!(fx
            .queries
            .get_cached_query_result("featured", &tag("Product"), &mut out)
            .await
            .is_none());
        // The entity entry itself reflects the write.
        assert_eq!(cached_stock(&fx, 1).await, Some(3));

        fx.orchestrator.commit().await;
    }

    #[tokio::test]
    async fn test_removal_flow() {
        let fx = fixture();
        let (graph, key) = product(1, 7);
        fx.entities.put(&graph, &key).await;
        let scope = CollectionScope::all();
        fx.entities
            .put_collection(&[key.clone()], &tag("Product"), &scope)
            .await;

        fx.orchestrator.before_remove(&key).await;
        // Entity entry dropped while the identity was still known.
        assert_eq!(cached_stock(&fx, 1).await, None);
        assert_eq!(fx.orchestrator.pending_removals(), 1);

        fx.orchestrator.after_remove(&key).await;
        fx.orchestrator.commit().await;

        let mut out = EntityGraph::new();
        assert!(fx
            .entities
            .get_collection(&tag("Product"), &scope, &mut out)
            .await
            .is_none());
        assert_eq!(fx.orchestrator.phase(), TransactionPhase::Idle);
        assert_eq!(fx.orchestrator.pending_removals(), 0);
    }

    #[tokio::test]
    async fn test_lock_held_until_commit() {
        let fx = fixture();
        let (graph, key) = product(1, 7);

        fx.orchestrator.before_update(&graph, &key).await;
        // The orchestrator holds the write lock.
        assert!(fx.entities.lock(&key).await.is_none());

        fx.orchestrator.after_update(&graph, &key).await;
        fx.orchestrator.commit().await;

        let reacquired = fx.entities.lock(&key).await.unwrap();
        fx.entities.release(reacquired).await;
    }

    #[tokio::test]
    async fn test_lock_acquired_once_per_key() {
        let fx = fixture();
        let (graph, key) = product(1, 7);

        fx.orchestrator.before_update(&graph, &key).await;
        fx.orchestrator.before_update(&graph, &key).await;

        let held = {
            let state = fx.orchestrator.state.lock();
            state.held_locks.len()
        };
        assert_eq!(held, 1);
        fx.orchestrator.rollback().await;
    }

    #[tokio::test]
    async fn test_rollback_drops_work_and_releases_locks() {
        let fx = fixture();
        let (graph, key) = product(1, 7);

        fx.orchestrator.before_update(&graph, &key).await;
        fx.orchestrator.rollback().await;

        assert_eq!(fx.orchestrator.phase(), TransactionPhase::Idle);
        assert_eq!(fx.orchestrator.pending_upserts(), 0);
        // Nothing was re-cached.
        assert_eq!(cached_stock(&fx, 1).await, None);
        // The lock is free again.
        let lock = fx.entities.lock(&key).await.unwrap();
        fx.entities.release(lock).await;
    }

    #[tokio::test]
    async fn test_remove_then_update_reinstates() {
        let fx = fixture();
        let (graph, key) = product(1, 7);

        fx.orchestrator.before_remove(&key).await;
        assert_eq!(fx.orchestrator.pending_removals(), 1);

        fx.orchestrator.before_update(&graph, &key).await;
        assert_eq!(fx.orchestrator.pending_removals(), 0);
        assert_eq!(fx.orchestrator.pending_upserts(), 1);

        fx.orchestrator.commit().await;
        assert_eq!(cached_stock(&fx, 1).await, Some(7));
    }

    #[tokio::test]
    async fn test_uncacheable_type_is_noop() {
        let fx = fixture();
        let mut graph = EntityGraph::new();
        let key = graph
            .insert(EntityRecord::with_identity(
                tag("Supplier"),
                Identity::single(1),
            ))
            .unwrap();

        fx.orchestrator.before_update(&graph, &key).await;
        fx.orchestrator.after_update(&graph, &key).await;
        assert_eq!(fx.orchestrator.phase(), TransactionPhase::Idle);
        assert_eq!(fx.store.stats().key_count, 0);
    }

    #[tokio::test]
    async fn test_auto_cache_on_load() {
        let enabled = fixture();
        let (graph, key) = product(1, 7);
        enabled.orchestrator.entity_loaded(&graph, &key).await;
        assert_eq!(cached_stock(&enabled, 1).await, Some(7));
        assert_eq!(enabled.orchestrator.phase(), TransactionPhase::Idle);

        let disabled = fixture_with(
            CacheSettings::new("vc", b"test-secret".to_vec()).with_auto_cache_on_load(false),
        );
        disabled.orchestrator.entity_loaded(&graph, &key).await;
        assert_eq!(cached_stock(&disabled, 1).await, None);
    }

    #[tokio::test]
    async fn test_commit_without_transaction_is_noop() {
        let fx = fixture();
        fx.orchestrator.commit().await;
        assert_eq!(fx.orchestrator.phase(), TransactionPhase::Idle);
    }

    #[tokio::test]
    async fn test_double_invalidation_is_idempotent() {
        let fx = fixture();
        let (graph, key) = product(1, 7);
        fx.entities.put(&graph, &key).await;

        fx.orchestrator.before_remove(&key).await;
        fx.orchestrator.after_remove(&key).await;
        fx.orchestrator.commit().await;

        assert_eq!(cached_stock(&fx, 1).await, None);
        // Only the first delete found a key to remove.
        assert_eq!(fx.entities.metrics().invalidated_keys(), 1);
    }
}
