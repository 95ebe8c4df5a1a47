//! Cache Layer
//!
//! Write-through caching for persistence-layer objects, split across three
//! keyspaces that share one backing store:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      EntityCacheManager                         │
//! ├──────────────────────┬──────────────────────────────────────────┤
//! │  prefix:Type:id      │ sealed entity document (full payload)    │
//! │  prefix:collection:… │ sealed identity list, windowed scopes    │
//! │  prefix:lock:Type:id │ write-lock token, TTL-bounded            │
//! ├──────────────────────┴──────────────────────────────────────────┤
//! │                      QueryCacheManager                          │
//! ├──────────────────────┬──────────────────────────────────────────┤
//! │  prefix:query:Type:… │ sealed identity list, caller-named       │
//! └──────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Identity lists point into the entity keyspace; reading a collection or
//! query rehydrates members entity-by-entity, falling back to the backing
//! store for entries that have expired underneath the list.
//!
//! All read and write paths are fail-open. Corrupt entries self-heal by
//! deletion. See [`metrics::CacheMetrics`] for the counters every path
//! maintains.

pub mod entity;
pub mod gateway;
pub mod keys;
pub mod lock;
pub mod metrics;
pub mod query;

pub use entity::EntityCacheManager;
pub use gateway::StoreGateway;
pub use keys::{CollectionScope, KeyFactory, KeySpace, SortOrder};
pub use lock::{EntityLock, LockService};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use query::QueryCacheManager;
