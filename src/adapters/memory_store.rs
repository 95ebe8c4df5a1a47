//! In-Memory Key-Value Store Adapter
//!
//! Reference adapter and test double for the [`KeyValueStore`] port. Uses
//! DashMap for lock-free concurrent access and checks TTLs lazily on read.
//!
//! Test hooks:
//!
//! - `advance` shifts a logical clock so TTL expiry is testable without
//!   sleeping
//! - `set_unavailable` makes every operation fail, for exercising fail-open
//!   paths
//! - `set_enumerate_segment_limit` makes `enumerate` return empty for
//!   patterns deeper than N segments, modelling a store that only indexes
//!   shallow prefixes
//! - `set_scan_disabled` makes `scan_page` terminate immediately with no
//!   keys

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cache::keys::pattern_matches;
use crate::domain::ports::{KeyValueStore, ScanCursor};
use crate::error::{Error, Result};

const NO_SEGMENT_LIMIT: usize = usize::MAX;

#[derive(Debug, Clone)]
struct StoredEntry {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

/// Operation counters for the in-memory store.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub key_count: u64,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// In-memory [`KeyValueStore`] for tests and single-process deployments.
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, StoredEntry>,
    /// Logical clock offset added to `Instant::now()`.
    clock_offset: Mutex<Duration>,
    unavailable: AtomicBool,
    enumerate_segment_limit: AtomicUsize,
    scan_disabled: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            clock_offset: Mutex::new(Duration::ZERO),
            unavailable: AtomicBool::new(false),
            enumerate_segment_limit: AtomicUsize::new(NO_SEGMENT_LIMIT),
            scan_disabled: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the logical clock, expiring entries whose TTL has elapsed.
    pub fn advance(&self, by: Duration) {
        *self.clock_offset.lock() += by;
    }

    /// Make every operation return a store error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Return empty `enumerate` results for patterns with more than `limit`
    /// colon-separated segments. `None` removes the limit.
    pub fn set_enumerate_segment_limit(&self, limit: Option<usize>) {
        self.enumerate_segment_limit
            .store(limit.unwrap_or(NO_SEGMENT_LIMIT), Ordering::SeqCst);
    }

    /// Make `scan_page` terminate immediately without yielding keys.
    pub fn set_scan_disabled(&self, disabled: bool) {
        self.scan_disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            key_count: self.entries.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    fn now(&self) -> Instant {
        Instant::now() + *self.clock_offset.lock()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Store("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    /// Live keys matching the pattern, sorted for deterministic paging.
    fn matching_keys(&self, pattern: &str) -> Vec<String> {
        let now = self.now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_live(now) && pattern_matches(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let now = self.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.data.clone()));
            }
        }
        // Absent or expired; drop the expired entry if it is still there.
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        self.entries.insert(
            key.to_string(),
            StoredEntry {
                data: value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        let now = self.now();
        let fresh = StoredEntry {
            data: value,
            expires_at: Some(now + ttl),
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    // Expired entry counts as absent.
                    occupied.insert(fresh);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;

        let now = self.now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.is_live(now) {
                entry.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.check_available()?;

        let now = self.now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if entry.is_live(now) {
                    removed += 1;
                    self.deletes.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(removed)
    }

    async fn enumerate(&self, pattern: &str) -> Result<Vec<String>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let limit = self.enumerate_segment_limit.load(Ordering::SeqCst);
        if pattern.split(':').count() > limit {
            // Best-effort contract: pretend this pattern is too deep for the
            // store's index.
            return Ok(Vec::new());
        }
        Ok(self.matching_keys(pattern))
    }

    async fn scan_page(
        &self,
        cursor: ScanCursor,
        pattern: &str,
        page_size: usize,
    ) -> Result<(ScanCursor, Vec<String>)> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        if self.scan_disabled.load(Ordering::SeqCst) {
            return Ok((ScanCursor(0), Vec::new()));
        }

        let matching = self.matching_keys(pattern);
        let start = (cursor.0 as usize).min(matching.len());
        let end = (start + page_size.max(1)).min(matching.len());
        let page = matching[start..end].to_vec();
        let next = if end >= matching.len() {
            ScanCursor(0)
        } else {
            ScanCursor(end as u64)
        };
        Ok((next, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryKeyValueStore::new();

        store.set("a", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(
            store.get("a").await.unwrap(),
            Some(Bytes::from_static(b"1"))
        );

        let removed = store.delete(&["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry_with_clock_advance() {
        let store = InMemoryKeyValueStore::new();

        store.set("a", Bytes::from_static(b"1")).await.unwrap();
        store.expire("a", Duration::from_secs(1)).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());

        store.advance(Duration::from_secs(2));
        assert_eq!(store.get("a").await.unwrap(), None);
        // The expired entry is gone, not just hidden.
        assert_eq!(store.stats().key_count, 0);
    }

    #[tokio::test]
    async fn test_entry_without_ttl_survives_clock_advance() {
        let store = InMemoryKeyValueStore::new();
        store.set("a", Bytes::from_static(b"1")).await.unwrap();
        store.advance(Duration::from_secs(3600));
        assert!(store.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_if_absent() {
        let store = InMemoryKeyValueStore::new();

        let won = store
            .set_if_absent("lock", Bytes::from_static(b"t1"), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(won);

        let lost = store
            .set_if_absent("lock", Bytes::from_static(b"t2"), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!lost);
        assert_eq!(
            store.get("lock").await.unwrap(),
            Some(Bytes::from_static(b"t1"))
        );
    }

    #[tokio::test]
    async fn test_set_if_absent_after_expiry() {
        let store = InMemoryKeyValueStore::new();

        store
            .set_if_absent("lock", Bytes::from_static(b"t1"), Duration::from_secs(30))
            .await
            .unwrap();
        store.advance(Duration::from_secs(31));

        let won = store
            .set_if_absent("lock", Bytes::from_static(b"t2"), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(won);
    }

    #[tokio::test]
    async fn test_enumerate_globs_and_sorts() {
        let store = InMemoryKeyValueStore::new();
        store.set("vc:Product:2", Bytes::from_static(b"b")).await.unwrap();
        store.set("vc:Product:1", Bytes::from_static(b"a")).await.unwrap();
        store.set("vc:Customer:1", Bytes::from_static(b"c")).await.unwrap();

        let keys = store.enumerate("vc:Product:*").await.unwrap();
        assert_eq!(keys, vec!["vc:Product:1", "vc:Product:2"]);
    }

    #[tokio::test]
    async fn test_enumerate_segment_limit() {
        let store = InMemoryKeyValueStore::new();
        store
            .set("vc:collection:Product:all", Bytes::from_static(b"x"))
            .await
            .unwrap();

        store.set_enumerate_segment_limit(Some(3));
        assert!(store
            .enumerate("vc:collection:Product:*")
            .await
            .unwrap()
            .is_empty());
        // A shallower pattern still works.
        assert_eq!(store.enumerate("vc:collection:*").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_pages_through_keyspace() {
        let store = InMemoryKeyValueStore::new();
        for i in 0..7 {
            store
                .set(&format!("vc:Product:{i}"), Bytes::from_static(b"x"))
                .await
                .unwrap();
        }

        let mut collected = Vec::new();
        let mut cursor = ScanCursor::initial();
        loop {
            let (next, page) = store.scan_page(cursor, "vc:Product:*", 3).await.unwrap();
            collected.extend(page);
            if next.is_terminal() {
                break;
            }
            cursor = next;
        }
        assert_eq!(collected.len(), 7);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryKeyValueStore::new();
        store.set("a", Bytes::from_static(b"1")).await.unwrap();
        store.set_unavailable(true);

        assert!(store.get("a").await.is_err());
        assert!(store.set("b", Bytes::from_static(b"2")).await.is_err());
        assert!(store.enumerate("*").await.is_err());

        store.set_unavailable(false);
        assert!(store.get("a").await.unwrap().is_some());
    }
}
