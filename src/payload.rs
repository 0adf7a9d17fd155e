//! Self-describing serialized field payloads
//!
//! The wire format is a single ASCII token:
//!
//! ```text
//! ENC:<key_id>.<ciphertext_b64>.<iv_b64>.<tag_b64>.<salt_b64>.<metadata_b64json>
//! ```
//!
//! The embedded key id is authoritative; decrypting a payload never requires
//! knowing which key is currently active.

use crate::error::{Error, Result};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Marker prefix identifying an encrypted value
pub const PAYLOAD_PREFIX: &str = "ENC:";

/// Current payload format version
pub const PAYLOAD_VERSION: &str = "1.0";

const SEGMENT_COUNT: usize = 6;
const CHECKSUM_LEN: usize = 16;

/// Metadata embedded in every payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayloadMetadata {
    /// When the payload was produced
    pub timestamp: DateTime<Utc>,

    /// Payload format version
    pub version: String,

    /// Truncated hex SHA-256 of the ciphertext
    pub checksum: String,

    /// Whether the plaintext was compressed before encryption
    pub compressed: bool,
}

impl PayloadMetadata {
    /// Creates metadata for a freshly produced ciphertext
    pub fn new(ciphertext: &[u8]) -> Self {
        Self {
            timestamp: Utc::now(),
            version: PAYLOAD_VERSION.to_string(),
            checksum: checksum(ciphertext),
            compressed: false,
        }
    }
}

/// Computes the truncated hex SHA-256 checksum of a ciphertext
pub fn checksum(ciphertext: &[u8]) -> String {
    let digest = Sha256::digest(ciphertext);
    hex::encode(digest)[..CHECKSUM_LEN].to_string()
}

/// The wire/storage representation of one encrypted field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Id of the key the ciphertext was produced under
    pub key_id: String,

    /// AEAD ciphertext without the tag
    pub ciphertext: Vec<u8>,

    /// Nonce used for the AEAD operation
    pub iv: Vec<u8>,

    /// Detached authentication tag
    pub auth_tag: Vec<u8>,

    /// Per-call salt, bound into the tag as associated data
    pub salt: Vec<u8>,

    /// Embedded metadata
    pub metadata: PayloadMetadata,
}

impl EncryptedPayload {
    /// Returns true if a stored value is recognized as an encrypted payload
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(PAYLOAD_PREFIX) && value[PAYLOAD_PREFIX.len()..].contains('.')
    }
}

impl fmt::Display for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metadata_json = serde_json::to_vec(&self.metadata).map_err(|_| fmt::Error)?;

        write!(
            f,
            "{}{}.{}.{}.{}.{}.{}",
            PAYLOAD_PREFIX,
            self.key_id,
            BASE64.encode(&self.ciphertext),
            BASE64.encode(&self.iv),
            BASE64.encode(&self.auth_tag),
            BASE64.encode(&self.salt),
            BASE64.encode(&metadata_json),
        )
    }
}

impl FromStr for EncryptedPayload {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix(PAYLOAD_PREFIX)
            .ok_or_else(|| Error::MalformedPayload("missing ENC: prefix".into()))?;

        let segments: Vec<&str> = body.split('.').collect();
        if segments.len() != SEGMENT_COUNT {
            return Err(Error::MalformedPayload(format!(
                "expected {} segments, found {}",
                SEGMENT_COUNT,
                segments.len()
            )));
        }

        if segments[0].is_empty() {
            return Err(Error::MalformedPayload("empty key id".into()));
        }

        let decode = |segment: &str, name: &str| -> Result<Vec<u8>> {
            BASE64.decode(segment).map_err(|e| {
                Error::MalformedPayload(format!("invalid base64 in {} segment: {}", name, e))
            })
        };

        let metadata_json = decode(segments[5], "metadata")?;
        let metadata: PayloadMetadata = serde_json::from_slice(&metadata_json)
            .map_err(|e| Error::MalformedPayload(format!("invalid metadata JSON: {}", e)))?;

        Ok(Self {
            key_id: segments[0].to_string(),
            ciphertext: decode(segments[1], "ciphertext")?,
            iv: decode(segments[2], "iv")?,
            auth_tag: decode(segments[3], "auth_tag")?,
            salt: decode(segments[4], "salt")?,
            metadata,
        })
    }
}
