//! Cryptographic primitives for field encryption

pub mod aes256gcm;

use crate::error::Result;
use std::fmt;

/// Nonce size for GCM mode in bytes
pub const GCM_NONCE_SIZE: usize = 12;

/// Authentication tag size for GCM mode in bytes
pub const GCM_TAG_SIZE: usize = 16;

/// Salt size for payload binding in bytes
pub const SALT_SIZE: usize = 16;

/// Maximum data size for GCM mode
pub const GCM_MAX_DATA_SIZE: usize = 64 * 1024 * 1024;

/// Ciphertext and detached authentication tag produced by a seal operation
#[derive(Debug, Clone)]
pub struct SealedData {
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

/// AEAD interface with an explicit nonce and associated data
///
/// The payload format carries nonce, tag, and salt as discrete segments, so
/// the cipher seam exposes them separately rather than packing them into a
/// single buffer.
pub trait FieldAead: Send + Sync + fmt::Debug {
    /// Encrypts plaintext, binding `aad` into the authentication tag
    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<SealedData>;

    /// Decrypts and authenticates ciphertext against the detached tag
    fn open(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>>;
}

pub use aes256gcm::Aes256GcmFieldAead;
