//! Key-Value Gateway
//!
//! Thin wrapper around the [`KeyValueStore`] port. Single-key operations
//! pass straight through; bulk key listing goes through a three-tier
//! fallback because backing stores differ in how reliably they enumerate:
//!
//! 1. direct pattern enumeration, used as-is when non-empty
//! 2. cursor-paginated scanning, accumulated and deduplicated
//! 3. a single prefix-broadening retry with client-side filtering
//!
//! The last tier covers stores whose pattern index only handles shallow
//! prefixes; very large keyspaces are covered by the paginated tier.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::domain::ports::{KeyValueStore, ScanCursor};
use crate::error::Result;

use super::keys::{broaden_pattern, pattern_matches};

/// Upper bound on scan pages per enumeration. A store whose cursor never
/// terminates must not wedge the caller.
const MAX_SCAN_PAGES: usize = 100_000;

/// Gateway over the backing key-value store.
#[derive(Clone)]
pub struct StoreGateway {
    store: Arc<dyn KeyValueStore>,
    scan_page_size: usize,
}

impl StoreGateway {
    pub fn new(store: Arc<dyn KeyValueStore>, scan_page_size: usize) -> Self {
        Self {
            store,
            scan_page_size: scan_page_size.max(1),
        }
    }

    // -------------------------------------------------------------------------
    // Passthroughs
    // -------------------------------------------------------------------------

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.store.get(key).await
    }

    pub async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.store.set(key, value).await
    }

    pub async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
        self.store.set_if_absent(key, value, ttl).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.store.expire(key, ttl).await
    }

    pub async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.store.delete(keys).await
    }

    pub async fn delete_key(&self, key: &str) -> Result<u64> {
        self.store.delete(std::slice::from_ref(&key.to_string())).await
    }

    // -------------------------------------------------------------------------
    // Resilient enumeration
    // -------------------------------------------------------------------------

    /// Full set of keys matching `pattern`, using the three-tier fallback.
    pub async fn enumerate_matching(&self, pattern: &str) -> Result<Vec<String>> {
        // Tier 1: one direct call, trusted when it yields anything.
        match self.store.enumerate(pattern).await {
            Ok(keys) if !keys.is_empty() => return Ok(keys),
            Ok(_) => {}
            Err(e) => {
                // Fall through to the scan tier; a store that cannot
                // enumerate may still be able to scan.
                warn!(pattern, error = %e, "direct enumeration failed, falling back to scan");
            }
        }

        // Tier 2: paginated scan, deduplicated because cursor scans may
        // repeat keys.
        let scanned = self.scan_all(pattern).await?;
        if !scanned.is_empty() {
            return Ok(scanned.into_iter().collect());
        }

        // Tier 3: broaden to the last separator before the wildcard and
        // filter client-side against the original pattern.
        let Some(broadened) = broaden_pattern(pattern) else {
            return Ok(Vec::new());
        };
        debug!(pattern, broadened, "enumeration empty, retrying with broadened pattern");

        let candidates = match self.store.enumerate(&broadened).await {
            Ok(keys) if !keys.is_empty() => keys,
            Ok(_) => self.scan_all(&broadened).await?.into_iter().collect(),
            Err(e) => {
                warn!(pattern = %broadened, error = %e, "broadened enumeration failed, scanning instead");
                self.scan_all(&broadened).await?.into_iter().collect()
            }
        };
        Ok(candidates
            .into_iter()
            .filter(|key| pattern_matches(pattern, key))
            .collect())
    }

    /// Delete every key matching `pattern`. Returns how many were removed.
    pub async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let keys = self.enumerate_matching(pattern).await?;
        self.delete(&keys).await
    }

    async fn scan_all(&self, pattern: &str) -> Result<BTreeSet<String>> {
        let mut collected = BTreeSet::new();
        let mut cursor = ScanCursor::initial();
        let mut pages = 0;

        loop {
            let (next, page) = self
                .store
                .scan_page(cursor, pattern, self.scan_page_size)
                .await?;
            collected.extend(page);

            if next.is_terminal() {
                break;
            }
            pages += 1;
            if pages >= MAX_SCAN_PAGES {
                warn!(pattern, pages, "scan cursor did not terminate, stopping early");
                break;
            }
            cursor = next;
        }
        Ok(collected)
    }
}
