//! Integrity Codec
//!
//! Every cache entry is wrapped in a sealed envelope carrying a keyed digest
//! (HMAC-SHA256) of its content. The digest is computed over the exact bytes
//! that get stored, so verification needs no canonicalization step: reading
//! back the envelope and re-keying the MAC over the same bytes either
//! reproduces the digest or proves the entry was tampered with or written by
//! a peer holding a different secret.
//!
//! Verification failures are not errors to the cache's callers; the managers
//! treat them as corruption, delete the key, and report a miss.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::domain::identity::TypeTag;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Separator between the signed components of an index digest. Identities
/// never contain this byte (scalar identities are application keys, composite
/// identities are hex digests), so the joined message is unambiguous.
const UNIT_SEPARATOR: char = '\u{1F}';

// =============================================================================
// Sealed Envelopes
// =============================================================================

/// Envelope for a single-entity cache entry.
///
/// `payload` is the JSON wire document produced by the object serializer,
/// kept as a string so the MAC covers its exact bytes. `type_tag` binds the
/// entry to the entity type it was written for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEntry {
    pub payload: String,
    pub integrity: String,
    pub type_tag: String,
    pub created_at: DateTime<Utc>,
}

impl SealedEntry {
    /// Serialize the envelope for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Envelope for a collection or query cache entry.
///
/// Holds member identities only, never payloads. The digest covers the type
/// tag, the scope the list was cached under, and the ordered identity list,
/// so an entry cannot be replayed for a different scope or type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedIndex {
    pub identities: Vec<String>,
    pub integrity: String,
    pub type_tag: String,
    pub created_at: DateTime<Utc>,
}

impl SealedIndex {
    /// Serialize the envelope for storage.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Seals and unseals cache envelopes with a shared secret.
#[derive(Clone)]
pub struct IntegrityCodec {
    secret: Vec<u8>,
}

impl std::fmt::Debug for IntegrityCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("IntegrityCodec").finish_non_exhaustive()
    }
}

impl IntegrityCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn keyed_mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    /// Hex digest over raw bytes.
    fn sign(&self, message: &[u8]) -> String {
        let mut mac = self.keyed_mac();
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex digest against raw bytes.
    fn verify(&self, message: &[u8], integrity_hex: &str) -> Result<()> {
        let expected = hex::decode(integrity_hex)
            .map_err(|_| Error::Codec("integrity digest is not valid hex".to_string()))?;
        let mut mac = self.keyed_mac();
        mac.update(message);
        mac.verify_slice(&expected)
            .map_err(|_| Error::Codec("integrity digest mismatch".to_string()))
    }

    fn index_message(type_tag: &str, scope: &str, identities: &[String]) -> Vec<u8> {
        let mut message = String::with_capacity(
            type_tag.len() + scope.len() + identities.iter().map(|i| i.len() + 1).sum::<usize>() + 2,
        );
        message.push_str(type_tag);
        message.push(UNIT_SEPARATOR);
        message.push_str(scope);
        for identity in identities {
            message.push(UNIT_SEPARATOR);
            message.push_str(identity);
        }
        message.into_bytes()
    }

    // -------------------------------------------------------------------------
    // Entity envelopes
    // -------------------------------------------------------------------------

    /// Wrap a wire payload in a sealed envelope for `type_tag`.
    pub fn seal(&self, payload: String, type_tag: &TypeTag) -> SealedEntry {
        let integrity = self.sign(payload.as_bytes());
        SealedEntry {
            payload,
            integrity,
            type_tag: type_tag.as_str().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Parse and verify a stored envelope, returning the wire payload.
    ///
    /// Fails when the envelope does not parse, the digest does not match the
    /// payload bytes, or the entry was sealed for a different type. Callers
    /// treat every failure as corruption: delete the key, report a miss.
    pub fn unseal(&self, raw: &[u8], expected_type: &TypeTag) -> Result<String> {
        let entry: SealedEntry = serde_json::from_slice(raw)
            .map_err(|e| Error::Codec(format!("unparsable cache envelope: {e}")))?;
        self.verify(entry.payload.as_bytes(), &entry.integrity)?;
        if entry.type_tag != expected_type.as_str() {
            return Err(Error::Codec(format!(
                "type tag mismatch: entry sealed for '{}', requested '{}'",
                entry.type_tag,
                expected_type.as_str()
            )));
        }
        Ok(entry.payload)
    }

    // -------------------------------------------------------------------------
    // Index envelopes
    // -------------------------------------------------------------------------

    /// Seal an ordered identity list for a collection or query scope.
    pub fn seal_index(
        &self,
        type_tag: &TypeTag,
        scope: &str,
        identities: Vec<String>,
    ) -> SealedIndex {
        let message = Self::index_message(type_tag.as_str(), scope, &identities);
        SealedIndex {
            integrity: self.sign(&message),
            identities,
            type_tag: type_tag.as_str().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Parse and verify a stored index envelope, returning the identity list
    /// in its cached order. Same failure rules as [`unseal`](Self::unseal);
    /// the digest additionally binds the entry to `scope`, so an index copied
    /// under a different key fails verification.
    pub fn unseal_index(
        &self,
        raw: &[u8],
        expected_type: &TypeTag,
        scope: &str,
    ) -> Result<Vec<String>> {
        let entry: SealedIndex = serde_json::from_slice(raw)
            .map_err(|e| Error::Codec(format!("unparsable index envelope: {e}")))?;
        if entry.type_tag != expected_type.as_str() {
            return Err(Error::Codec(format!(
                "type tag mismatch: index sealed for '{}', requested '{}'",
                entry.type_tag,
                expected_type.as_str()
            )));
        }
        let message = Self::index_message(&entry.type_tag, scope, &entry.identities);
        self.verify(&message, &entry.integrity)?;
        Ok(entry.identities)
    }
}
