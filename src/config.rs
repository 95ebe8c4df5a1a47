//! Cache engine configuration

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for the cache engine.
///
/// One `CacheSettings` instance is shared by the managers and the
/// orchestrator. The key prefix namespaces every stored key so that
/// multiple logical caches can share one backing store.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Namespace prefix prepended to every cache key
    pub key_prefix: String,

    /// Secret key for the integrity HMAC
    pub secret_key: Vec<u8>,

    /// TTL applied when a type's policy does not specify one
    pub default_ttl: Duration,

    /// TTL for per-entity write locks
    pub lock_ttl: Duration,

    /// Populate the entity cache immediately when an entity is loaded
    pub auto_cache_on_load: bool,

    /// Page size for cursor-based key scanning
    pub scan_page_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: "veracache".to_string(),
            secret_key: Vec::new(),
            default_ttl: Duration::from_secs(3600),
            lock_ttl: Duration::from_secs(30),
            auto_cache_on_load: true,
            scan_page_size: 250,
        }
    }
}

impl CacheSettings {
    /// Create settings with the given namespace prefix and HMAC secret.
    pub fn new(key_prefix: impl Into<String>, secret_key: impl Into<Vec<u8>>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            secret_key: secret_key.into(),
            ..Self::default()
        }
    }

    /// Set the default entry TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the lock TTL.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Enable or disable immediate caching on entity load.
    pub fn with_auto_cache_on_load(mut self, enabled: bool) -> Self {
        self.auto_cache_on_load = enabled;
        self
    }

    /// Set the cursor scan page size.
    pub fn with_scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size;
        self
    }

    /// Validate the settings.
    ///
    /// The prefix must be non-empty and free of the key separator and
    /// wildcard characters; an empty secret would make the integrity hash
    /// forgeable by anyone who can write to the store.
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(Error::Config("key prefix must not be empty".to_string()));
        }
        if self.key_prefix.contains(':') || self.key_prefix.contains('*') {
            return Err(Error::Config(format!(
                "key prefix {:?} must not contain ':' or '*'",
                self.key_prefix
            )));
        }
        if self.secret_key.is_empty() {
            return Err(Error::Config(
                "integrity secret key must not be empty".to_string(),
            ));
        }
        if self.scan_page_size == 0 {
            return Err(Error::Config("scan page size must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = CacheSettings::default();
        assert_eq!(settings.key_prefix, "veracache");
        assert_eq!(settings.default_ttl, Duration::from_secs(3600));
        assert_eq!(settings.lock_ttl, Duration::from_secs(30));
        assert!(settings.auto_cache_on_load);
    }

    #[test]
    fn test_builder_chain() {
        let settings = CacheSettings::new("app", b"secret".to_vec())
            .with_default_ttl(Duration::from_secs(60))
            .with_lock_ttl(Duration::from_secs(5))
            .with_auto_cache_on_load(false)
            .with_scan_page_size(50);

        assert_eq!(settings.key_prefix, "app");
        assert_eq!(settings.default_ttl, Duration::from_secs(60));
        assert_eq!(settings.lock_ttl, Duration::from_secs(5));
        assert!(!settings.auto_cache_on_load);
        assert_eq!(settings.scan_page_size, 50);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_prefix() {
        let settings = CacheSettings::new("app:sub", b"secret".to_vec());
        assert!(settings.validate().is_err());

        let settings = CacheSettings::new("", b"secret".to_vec());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_secret() {
        let settings = CacheSettings::new("app", Vec::new());
        assert!(settings.validate().is_err());
    }
}
