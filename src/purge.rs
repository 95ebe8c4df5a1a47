//! Administrative Cache Purge
//!
//! Operator-facing bulk deletion by keyspace and type. Unlike every
//! request-path operation, purging is fail-closed: enumeration and
//! deletion errors propagate so the operator knows the purge did not
//! complete. Entries are deleted by pattern without integrity checks.
//!
//! Lock keys are never purged. Dropping a live lock token would hand the
//! same entity to two writers; locks expire on their own TTL instead.

use std::sync::Arc;

use tracing::info;

use crate::cache::gateway::StoreGateway;
use crate::cache::keys::{KeyFactory, KeySpace};
use crate::config::CacheSettings;
use crate::domain::identity::TypeTag;
use crate::domain::ports::KeyValueStore;
use crate::error::Result;

/// Which keyspace a purge request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeScope {
    Entity,
    Collection,
    Query,
    All,
}

/// A purge request, built with the chained setters.
#[derive(Debug, Clone)]
pub struct PurgeRequest {
    pub target_type: Option<TypeTag>,
    pub scope: PurgeScope,
    pub dry_run: bool,
}

impl PurgeRequest {
    pub fn new(scope: PurgeScope) -> Self {
        Self {
            target_type: None,
            scope,
            dry_run: false,
        }
    }

    /// Restrict the purge to one registered type.
    pub fn for_type(mut self, type_tag: TypeTag) -> Self {
        self.target_type = Some(type_tag);
        self
    }

    /// Enumerate and report matches without deleting anything.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// What a purge found and did.
#[derive(Debug, Clone)]
pub struct PurgeReport {
    pub entity_keys: u64,
    pub collection_keys: u64,
    pub query_keys: u64,
    pub deleted: u64,
    pub dry_run: bool,
    /// Matched keys, carried only on dry runs.
    pub matched_keys: Option<Vec<String>>,
}

impl PurgeReport {
    pub fn matched(&self) -> u64 {
        self.entity_keys + self.collection_keys + self.query_keys
    }
}

/// Administrative purger over a backing store.
pub struct CachePurger {
    gateway: StoreGateway,
    keys: KeyFactory,
}

impl CachePurger {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: &CacheSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            gateway: StoreGateway::new(store, settings.scan_page_size),
            keys: KeyFactory::new(settings.key_prefix.clone()),
        })
    }

    /// Execute a purge. Errors propagate; a partial purge is reported as
    /// a failure, never as a smaller count.
    pub async fn purge(&self, request: &PurgeRequest) -> Result<PurgeReport> {
        let target = request.target_type.as_ref();

        let mut entity_keys = Vec::new();
        let mut collection_keys = Vec::new();
        let mut query_keys = Vec::new();

        match request.scope {
            PurgeScope::Entity => {
                entity_keys = self.enumerate_entities(target).await?;
            }
            PurgeScope::Collection => {
                collection_keys = self
                    .gateway
                    .enumerate_matching(&self.keys.collection_pattern(target))
                    .await?;
            }
            PurgeScope::Query => {
                query_keys = self
                    .gateway
                    .enumerate_matching(&self.keys.query_pattern(target))
                    .await?;
            }
            PurgeScope::All => {
                entity_keys = self.enumerate_entities(target).await?;
                collection_keys = self
                    .gateway
                    .enumerate_matching(&self.keys.collection_pattern(target))
                    .await?;
                query_keys = self
                    .gateway
                    .enumerate_matching(&self.keys.query_pattern(target))
                    .await?;
            }
        }

        let report_entities = entity_keys.len() as u64;
        let report_collections = collection_keys.len() as u64;
        let report_queries = query_keys.len() as u64;

        let mut matched = entity_keys;
        matched.append(&mut collection_keys);
        matched.append(&mut query_keys);

        let deleted = if request.dry_run {
            0
        } else {
            self.gateway.delete(&matched).await?
        };

        info!(
            scope = ?request.scope,
            target = target.map(|t| t.as_str()).unwrap_or("*"),
            matched = matched.len(),
            deleted,
            dry_run = request.dry_run,
            "cache purge"
        );

        Ok(PurgeReport {
            entity_keys: report_entities,
            collection_keys: report_collections,
            query_keys: report_queries,
            deleted,
            dry_run: request.dry_run,
            matched_keys: request.dry_run.then_some(matched),
        })
    }

    /// Entity keys carry no namespace segment of their own, so the
    /// untargeted case matches the whole prefix and keeps what classifies
    /// as entity.
    async fn enumerate_entities(&self, target: Option<&TypeTag>) -> Result<Vec<String>> {
        match target {
            Some(type_tag) => {
                self.gateway
                    .enumerate_matching(&self.keys.entity_pattern(type_tag))
                    .await
            }
            None => {
                let all = self
                    .gateway
                    .enumerate_matching(&self.keys.all_pattern())
                    .await?;
                Ok(all
                    .into_iter()
                    .filter(|key| self.keys.keyspace_of(key) == Some(KeySpace::Entity))
                    .collect())
            }
        }
    }
}
