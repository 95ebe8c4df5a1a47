//! VeraCache - Integrity-Checked Write-Through Object Cache
//!
//! A write-through cache for persistence-layer objects, backed by any
//! key-value store that can get, set, expire, delete, and enumerate keys.
//! Entities are stored as JSON documents inside HMAC-SHA256-sealed
//! envelopes; entries that fail verification are deleted on read and
//! served as misses, so a tampered or torn write can never reach a caller.
//!
//! # Architecture
//!
//! ```text
//! Persistence lifecycle events          Application reads
//!            │                                 │
//!            ▼                                 ▼
//! ┌──────────────────────┐   ┌─────────────────────────────────┐
//! │ Invalidation         │   │ EntityCacheManager /            │
//! │ Orchestrator         │──▶│ QueryCacheManager               │
//! │ (per-transaction     │   │ (seal/unseal, graph codec,      │
//! │  accumulate + flush) │   │  locks, rehydration)            │
//! └──────────────────────┘   └───────────────┬─────────────────┘
//!                                            ▼
//!                            ┌─────────────────────────────────┐
//!                            │ StoreGateway                    │
//!                            │ (tiered enumeration, batching)  │
//!                            └───────────────┬─────────────────┘
//!                                            ▼
//!                                 backing key-value store
//! ```
//!
//! Every request-path operation is fail-open: cache trouble degrades to
//! "hit the backing store", never to an error. The administrative purge
//! surface is the one fail-closed exception.
//!
//! # Modules
//!
//! - [`adapters`] - In-memory implementations of the domain ports
//! - [`cache`] - Entity, collection, and query cache managers
//! - [`codec`] - Graph serialization and sealed integrity envelopes
//! - [`config`] - Engine settings
//! - [`domain`] - Identities, entity graphs, and port traits
//! - [`error`] - Error types
//! - [`orchestrator`] - Transaction-scoped invalidation orchestration
//! - [`purge`] - Administrative bulk deletion
//! - [`registry`] - Per-type cache policies
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use veracache::{
//!     CachePolicy, CacheRegistry, CacheSettings, EntityCacheManager, TypeTag,
//! };
//!
//! let registry = CacheRegistry::new().register(
//!     TypeTag::new("Product")?,
//!     CachePolicy::new().with_lock_on_write(true),
//! );
//! let cache = EntityCacheManager::new(
//!     store,
//!     entities,
//!     Arc::new(registry),
//!     CacheSettings::new("app", secret),
//! )?;
//! ```

pub mod adapters;
pub mod cache;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod purge;
pub mod registry;

// Re-export commonly used types
pub use cache::{
    CacheMetrics, CollectionScope, EntityCacheManager, EntityLock, KeyFactory, MetricsSnapshot,
    QueryCacheManager, SortOrder,
};
pub use config::CacheSettings;
pub use domain::{
    EntityGraph, EntityKey, EntityRecord, EntityStore, FieldValue, Identity, KeyValueStore,
    ScanCursor, TypeTag,
};
pub use error::{Error, Result};
pub use orchestrator::{InvalidationOrchestrator, TransactionPhase};
pub use purge::{CachePurger, PurgeReport, PurgeRequest, PurgeScope};
pub use registry::{CachePolicy, CacheRegistry};
