//! Searchable-encryption artifacts
//!
//! `search_hash` supports exact-match lookup over encrypted fields without
//! storing plaintext: it is a SHA-256 over the value and a tenant-specific
//! salt, so it is deterministic for one tenant and stable across key
//! rotation (it does not involve the encryption key at all).
//!
//! `search_tokens` support constrained substring matching via hashed
//! lowercased 3-grams. This is deliberate, controlled leakage: token sets
//! reveal value length and n-gram frequency to anyone holding the index.
//! They are generated only when the cipher policy opts in.

use crate::error::{Error, Result};

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 16;
const NGRAM_SIZE: usize = 3;

/// Encrypted value plus its derived search artifacts
#[derive(Debug, Clone, Serialize)]
pub struct SearchableField {
    /// Serialized encrypted payload
    pub encrypted_value: String,

    /// Deterministic exact-match hash, stable across key rotation
    pub search_hash: String,

    /// Hashed 3-gram tokens for substring matching; empty unless the
    /// policy enables them
    pub search_tokens: Vec<String>,
}

/// Derives the per-tenant salt from the policy secret
pub fn tenant_salt(secret: &[u8], tenant_id: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Crypto(format!("invalid search salt secret: {}", e)))?;
    mac.update(tenant_id.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Computes the exact-match search hash for a value
pub fn search_hash(value: &str, salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.update(salt);
    hex::encode(hasher.finalize())
}

/// Computes deduplicated hashed 3-gram tokens for a value
///
/// Values shorter than three characters produce no tokens.
pub fn search_tokens(value: &str) -> Vec<String> {
    let lowered: Vec<char> = value.to_lowercase().chars().collect();
    if lowered.len() < NGRAM_SIZE {
        return Vec::new();
    }

    let mut tokens: Vec<String> = lowered
        .windows(NGRAM_SIZE)
        .map(|gram| {
            let gram: String = gram.iter().collect();
            let digest = Sha256::digest(gram.as_bytes());
            hex::encode(digest)[..TOKEN_LEN].to_string()
        })
        .collect();

    tokens.sort();
    tokens.dedup();
    tokens
}

/// Compares two search hashes in constant time
pub fn search_hash_matches(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_hash_is_deterministic_per_tenant() {
        let salt_t1 = tenant_salt(b"secret", "t1").unwrap();
        let salt_t2 = tenant_salt(b"secret", "t2").unwrap();

        let a = search_hash("alice@example.com", &salt_t1);
        let b = search_hash("alice@example.com", &salt_t1);
        let c = search_hash("alice@example.com", &salt_t2);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn search_hash_differs_per_value() {
        let salt = tenant_salt(b"secret", "t1").unwrap();
        assert_ne!(
            search_hash("alice@example.com", &salt),
            search_hash("bob@example.com", &salt)
        );
    }

    #[test]
    fn tokens_are_lowercased_deduplicated_trigrams() {
        let tokens = search_tokens("AbAbA");
        // Trigrams of "ababa": "aba", "bab", "aba" -> two distinct tokens.
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens, search_tokens("ababa"));

        for token in &tokens {
            assert_eq!(token.len(), 16);
        }
    }

    #[test]
    fn short_values_produce_no_tokens() {
        assert!(search_tokens("ab").is_empty());
        assert!(search_tokens("").is_empty());
        assert_eq!(search_tokens("abc").len(), 1);
    }

    #[test]
    fn hash_comparison_matches_equality() {
        let salt = tenant_salt(b"secret", "t1").unwrap();
        let a = search_hash("value", &salt);
        let b = search_hash("value", &salt);
        let c = search_hash("other", &salt);

        assert!(search_hash_matches(&a, &b));
        assert!(!search_hash_matches(&a, &c));
    }
}
