//! Pseudonym derivation and mapping types
//!
//! Pseudonyms are keyed digests: HMAC-SHA256 over the field name and the
//! original value under an engine-held secret. The same (field, value) pair
//! always yields the same pseudonym under the same secret, which keeps
//! referential integrity across records without exposing the value.

use crate::error::{Error, Result};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Placeholder stored in non-reversible mappings instead of the original
pub const REDACTED: &str = "[REDACTED]";

// Domain separator between field name and value in the MAC input.
const FIELD_VALUE_SEPARATOR: u8 = 0x1f;

/// Pseudonym derivation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PseudonymAlgorithm {
    HmacSha256,
}

impl std::fmt::Display for PseudonymAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PseudonymAlgorithm::HmacSha256 => write!(f, "HMAC_SHA256"),
        }
    }
}

/// One field's pseudonym record inside a mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Field the pseudonym replaced
    pub field_name: String,

    /// The original value, or [`REDACTED`] when the mapping is not
    /// reversible
    pub original: String,

    /// The pseudonym that replaced it
    pub pseudonym: String,

    /// Algorithm the pseudonym was derived with
    pub algorithm: PseudonymAlgorithm,

    /// When the entry was created
    pub created_at: DateTime<Utc>,
}

/// Persisted record of one reversible (or deliberately redacted)
/// pseudonymization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudonymizationMapping {
    /// Lookup key for the mapping
    pub mapping_id: String,

    /// Tenant the mapping belongs to
    pub tenant_id: String,

    /// Whether originals can be recovered from this mapping
    pub reversible: bool,

    /// Per-field pseudonym records
    pub entries: Vec<MappingEntry>,

    /// When the mapping was created
    pub created_at: DateTime<Utc>,
}

/// Derives the pseudonym for a (field, value) pair under a secret
pub fn derive_pseudonym(
    secret: &[u8],
    field_name: &str,
    value: &str,
    algorithm: PseudonymAlgorithm,
) -> Result<String> {
    match algorithm {
        PseudonymAlgorithm::HmacSha256 => {
            let mut mac = HmacSha256::new_from_slice(secret)
                .map_err(|e| Error::Crypto(format!("invalid pseudonym secret: {}", e)))?;
            mac.update(field_name.as_bytes());
            mac.update(&[FIELD_VALUE_SEPARATOR]);
            mac.update(value.as_bytes());
            Ok(hex::encode(mac.finalize().into_bytes()))
        }
    }
}

/// Reshapes a pseudonym digest onto the character-class structure of the
/// original value
///
/// Digits map to digits, letters to letters of the same case, and
/// everything else passes through, so a pseudonymized phone number still
/// looks like a phone number. Positional: the i-th output character is
/// driven by the i-th digest byte (cycling when the original is longer
/// than the digest).
pub fn retain_format(digest_hex: &str, original: &str) -> String {
    let digest = digest_hex.as_bytes();
    if digest.is_empty() {
        return original.to_string();
    }

    original
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let byte = digest[i % digest.len()];
            if c.is_ascii_digit() {
                char::from(b'0' + byte % 10)
            } else if c.is_ascii_uppercase() {
                char::from(b'A' + byte % 26)
            } else if c.is_ascii_lowercase() {
                char::from(b'a' + byte % 26)
            } else {
                c
            }
        })
        .collect()
}
