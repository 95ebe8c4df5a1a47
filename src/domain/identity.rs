//! Identity value objects
//!
//! Every cached object is addressed by a `(TypeTag, Identity)` pair. The
//! identity is derived once from the object's primary-key field(s) and must
//! stay deterministic for the lifetime of the cached data: single-field
//! identities are stringified directly, composite identities hash a stable
//! serialization of the ordered field-value tuple into one opaque string.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Namespace tokens that key construction claims for itself. A type tag
/// colliding with one of these would alias entity keys onto the collection,
/// query, or lock keyspaces.
pub const RESERVED_TYPE_TOKENS: &[&str] = &["collection", "query", "lock"];

/// Number of hex characters kept from a SHA-256 digest when deriving
/// composite identities and key digests (128 bits).
pub const DIGEST_HEX_LEN: usize = 32;

/// Identifier of a cacheable type (value object).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(String);

impl TypeTag {
    /// Create a type tag, rejecting empty names, reserved namespace tokens,
    /// and names containing the key separator or wildcard.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::UnknownType("<empty>".to_string()));
        }
        if name.contains(':') || name.contains('*') {
            return Err(Error::UnknownType(name));
        }
        if RESERVED_TYPE_TOKENS.contains(&name.as_str()) {
            return Err(Error::UnknownType(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity string derived from an object's primary-key field(s)
/// (value object).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Identity from a single primary-key value, stringified directly.
    pub fn single(value: impl ToString) -> Self {
        Self(value.to_string())
    }

    /// Identity from an ordered tuple of primary-key fields.
    ///
    /// The tuple is serialized into a length-prefixed byte stream (so that
    /// `("ab", "c")` and `("a", "bc")` cannot collide) and hashed; the
    /// result is one opaque, deterministic string.
    pub fn composite<'a, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut hasher = Sha256::new();
        for (name, value) in fields {
            hasher.update((name.len() as u64).to_be_bytes());
            hasher.update(name.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        Self(digest[..DIGEST_HEX_LEN].to_string())
    }

    /// Identity from an already-derived opaque string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle addressing one entity record within a graph and within the
/// cache keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub type_tag: TypeTag,
    pub identity: Identity,
}

impl EntityKey {
    pub fn new(type_tag: TypeTag, identity: Identity) -> Self {
        Self { type_tag, identity }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.type_tag, self.identity)
    }
}

/// Truncated SHA-256 hex digest of arbitrary input, used for criteria,
/// ordering, and caller-key segments of cache keys.
pub fn short_digest(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hex::encode(hasher.finalize());
    digest[..DIGEST_HEX_LEN].to_string()
}
