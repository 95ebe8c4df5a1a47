//! Domain Ports (Port/Adapter Pattern)
//!
//! The cache depends on two external collaborators, both consumed through
//! minimal async traits: the backing key-value store and the persistence
//! layer's object store. Adapters implement these traits; the cache never
//! names a concrete backend.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                     Cache Managers                      │
//! │  ┌──────────────────────────────────────────────────┐  │
//! │  │              Ports (Traits)                       │  │
//! │  │       KeyValueStore  │  EntityStore               │  │
//! │  └──────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌────────────────────────────────────────────────────────┐
//! │                       Adapters                          │
//! │  ┌──────────────────────────────────────────────────┐  │
//! │  │  InMemoryKeyValueStore │ InMemoryEntityStore      │  │
//! │  └──────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

use super::graph::EntityRecord;
use super::identity::{Identity, TypeTag};

// =============================================================================
// Value Objects
// =============================================================================

/// Opaque position token for paginated key scans.
///
/// A scan starts from [`ScanCursor::initial`] and is complete when the store
/// hands back a terminal cursor. Cursor scans may revisit keys; callers
/// deduplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor(pub u64);

impl ScanCursor {
    /// Cursor for the first page of a scan.
    pub fn initial() -> Self {
        Self(0)
    }

    /// True once the store has signalled that the scan is complete.
    ///
    /// The initial cursor and the terminal cursor share the zero value, so
    /// termination is checked on the cursor *returned* by a page, never on
    /// the one about to be submitted.
    pub fn is_terminal(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Key-Value Store Port
// =============================================================================

/// Port for the backing key-value store.
///
/// Values are opaque byte strings. Patterns use `*` as the only wildcard.
/// `enumerate` is best-effort: a store may legitimately return an empty or
/// partial result under load. Bulk operations therefore go through the
/// gateway's layered enumeration rather than calling it directly.
///
/// # Example
///
/// ```ignore
/// struct RedisStore { /* ... */ }
///
/// #[async_trait]
/// impl KeyValueStore for RedisStore {
///     async fn get(&self, key: &str) -> Result<Option<Bytes>> {
///         // GET key
///     }
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store `value` under `key`, replacing any previous value. The entry
    /// has no expiry until one is applied via [`expire`](Self::expire).
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Atomically store `value` under `key` with the given TTL, but only if
    /// the key does not exist. Returns `true` when the write happened.
    ///
    /// This is the primitive the lock protocol is built on; plain get+set
    /// cannot guarantee a single holder.
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool>;

    /// Apply a time-to-live to an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Delete the given keys. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// List keys matching a glob pattern. Best-effort; may return an empty
    /// result even when matching keys exist.
    async fn enumerate(&self, pattern: &str) -> Result<Vec<String>>;

    /// Fetch one page of keys matching `pattern`, resuming from `cursor`.
    /// The returned cursor is terminal when the scan has covered the
    /// keyspace.
    async fn scan_page(
        &self,
        cursor: ScanCursor,
        pattern: &str,
        page_size: usize,
    ) -> Result<(ScanCursor, Vec<String>)>;
}

// =============================================================================
// Entity Store Port
// =============================================================================

/// Port for the persistence layer's object store.
///
/// Used on the read path only: resolving reference stubs during decode and
/// re-attaching decoded objects to the persistence runtime. Cache misses
/// fall back to this port, never the other way around.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Load the entity with the given type and identity directly from the
    /// backing store. `Ok(None)` means the entity does not exist there.
    async fn load_by_identity(
        &self,
        type_tag: &TypeTag,
        identity: &Identity,
    ) -> Result<Option<EntityRecord>>;

    /// Register a decoded record with the persistence runtime so that later
    /// lifecycle events see it as a managed object. Best-effort; callers
    /// log failures and keep the record.
    async fn register_as_managed(&self, record: &EntityRecord) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_cursor_is_zero() {
        assert_eq!(ScanCursor::initial(), ScanCursor(0));
        assert_eq!(ScanCursor::initial().to_string(), "0");
    }

    #[test]
    fn test_terminal_check() {
        assert!(ScanCursor(0).is_terminal());
        assert!(!ScanCursor(17).is_terminal());
    }
}
