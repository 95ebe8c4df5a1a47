//! Query Result Cache Manager
//!
//! Caches the identity lists produced by arbitrary caller-defined queries.
//! The caller supplies an opaque key string that names the query; it is
//! digested into the cache key but sealed verbatim into the envelope, so
//! the same string must be presented on read.
//!
//! Results share the entity cache for member payloads: a cached query
//! stores identities only and rehydrates through [`EntityCacheManager`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::domain::graph::EntityGraph;
use crate::domain::identity::{EntityKey, TypeTag};

use super::entity::EntityCacheManager;

/// Cache manager for named query results.
pub struct QueryCacheManager {
    entities: Arc<EntityCacheManager>,
}

impl QueryCacheManager {
    pub fn new(entities: Arc<EntityCacheManager>) -> Self {
        Self { entities }
    }

    /// Cache the member list of a query identified by `caller_key`.
    ///
    /// `ttl` overrides the type's policy TTL for this entry; `None` falls
    /// back to the policy, then to the configured default. No-op when the
    /// type is not cacheable. Never raises.
    pub async fn cache_query_result(
        &self,
        caller_key: &str,
        members: &[EntityKey],
        type_tag: &TypeTag,
        ttl: Option<Duration>,
    ) {
        let Some(policy) = self.entities.policy(type_tag) else {
            debug!(%type_tag, "type not cacheable, skipping query result");
            return;
        };
        let ttl = ttl
            .or(policy.ttl())
            .unwrap_or(self.entities.settings().default_ttl);

        let identities: Vec<String> = members
            .iter()
            .map(|key| key.identity.as_str().to_string())
            .collect();
        let sealed = self
            .entities
            .codec()
            .seal_index(type_tag, caller_key, identities);
        let bytes = match sealed.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(%type_tag, query = caller_key, error = %e, "index serialization failed, result not cached");
                return;
            }
        };

        let cache_key = self.entities.keys().query_key(type_tag, caller_key);
        self.entities.write_entry(&cache_key, bytes, ttl).await;
    }

    /// Fetch a cached query result, rehydrating each member into `graph`.
    /// The stored list is returned in full; queries carry no window to
    /// re-apply. Corrupt entries are deleted and reported as a miss.
    pub async fn get_cached_query_result(
        &self,
        caller_key: &str,
        type_tag: &TypeTag,
        graph: &mut EntityGraph,
    ) -> Option<Vec<EntityKey>> {
        let cache_key = self.entities.keys().query_key(type_tag, caller_key);
        let raw = match self.entities.gateway().get(&cache_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.entities.metrics().record_query_miss();
                return None;
            }
            Err(e) => {
                self.entities.metrics().record_store_failure();
                warn!(%type_tag, query = caller_key, error = %e, "query read failed, treating as miss");
                self.entities.metrics().record_query_miss();
                return None;
            }
        };

        let identities = match self
            .entities
            .codec()
            .unseal_index(&raw, type_tag, caller_key)
        {
            Ok(identities) => identities,
            Err(e) => {
                self.entities.heal_corrupt(&cache_key, &e).await;
                self.entities.metrics().record_query_miss();
                return None;
            }
        };
        self.entities.metrics().record_query_hit();

        Some(
            self.entities
                .rehydrate_members(type_tag, &identities, graph)
                .await,
        )
    }

    /// Delete one query's cached result. Idempotent.
    pub async fn invalidate_query_cache(&self, caller_key: &str, type_tag: &TypeTag) {
        let cache_key = self.entities.keys().query_key(type_tag, caller_key);
        self.entities.invalidate_cache_key(&cache_key).await;
    }

    /// Delete every cached query result for a type.
    pub async fn invalidate_entity_query_caches(&self, type_tag: &TypeTag) {
        let pattern = self.entities.keys().query_pattern(Some(type_tag));
        match self.entities.gateway().delete_matching(&pattern).await {
            Ok(removed) => {
                if removed > 0 {
                    self.entities.metrics().record_invalidated(removed);
                }
                debug!(%type_tag, removed, "query caches invalidated");
            }
            Err(e) => {
                self.entities.metrics().record_store_failure();
                warn!(%type_tag, error = %e, "query invalidation failed");
            }
        }
    }
}
