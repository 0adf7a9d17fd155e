use crate::crypto::{FieldAead, SealedData, GCM_MAX_DATA_SIZE, GCM_NONCE_SIZE, GCM_TAG_SIZE};
use crate::error::{Error, Result};
use crate::key::AES256_KEY_SIZE;

use aes_gcm::{
    aead::{Aead as AeadTrait, KeyInit, Payload},
    Aes256Gcm, Key as AesKey, Nonce,
};

/// AES-256-GCM implementation of the field AEAD interface
#[derive(Default, Debug, Clone)]
pub struct Aes256GcmFieldAead;

impl Aes256GcmFieldAead {
    /// Creates a new instance of the AES-256-GCM AEAD implementation
    pub fn new() -> Self {
        Self
    }

    fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
        if key.len() != AES256_KEY_SIZE {
            return Err(Error::Crypto(format!(
                "invalid key length {}, expected {}",
                key.len(),
                AES256_KEY_SIZE
            )));
        }

        Ok(Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key)))
    }
}

impl FieldAead for Aes256GcmFieldAead {
    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<SealedData> {
        if plaintext.len() > GCM_MAX_DATA_SIZE {
            return Err(Error::Crypto("Data too large for GCM".into()));
        }
        if nonce.len() != GCM_NONCE_SIZE {
            return Err(Error::Crypto(format!(
                "invalid nonce length {}, expected {}",
                nonce.len(),
                GCM_NONCE_SIZE
            )));
        }

        let cipher = Self::cipher(key)?;

        // aes-gcm appends the tag to the ciphertext; split it off so the
        // payload can carry it as its own segment.
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        let tag = sealed.split_off(sealed.len() - GCM_TAG_SIZE);

        Ok(SealedData {
            ciphertext: sealed,
            tag,
        })
    }

    fn open(
        &self,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>> {
        if nonce.len() != GCM_NONCE_SIZE {
            return Err(Error::Crypto(format!(
                "invalid nonce length {}, expected {}",
                nonce.len(),
                GCM_NONCE_SIZE
            )));
        }
        if tag.len() != GCM_TAG_SIZE {
            return Err(Error::AuthenticationFailed(format!(
                "invalid tag length {}",
                tag.len()
            )));
        }

        let cipher = Self::cipher(key)?;

        let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &sealed,
                    aad,
                },
            )
            .map_err(|_| Error::AuthenticationFailed("AEAD tag verification failed".into()))
    }
}
