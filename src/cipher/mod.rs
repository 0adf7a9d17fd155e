//! Field-level encryption and decryption
//!
//! `FieldCipher` encrypts single field values against the active key for
//! the field's purpose, producing self-describing payloads, and decrypts
//! payloads against whichever key their embedded id names, active or
//! retired.

pub mod search;

use crate::crypto::{Aes256GcmFieldAead, FieldAead, GCM_NONCE_SIZE, SALT_SIZE};
use crate::error::{Error, Result};
use crate::key::KeyPurpose;
use crate::lifecycle::KeyLifecycleManager;
use crate::metrics::Timer;
use crate::payload::{EncryptedPayload, PayloadMetadata};
use crate::policy::{CipherPolicy, FailureMode};
use crate::usage::{elapsed_ms, record_usage, CryptoOperation, UsageLogEntry};
use crate::{metrics, util, UsageLogStore};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub use search::SearchableField;

/// Result of a record-level cipher operation
///
/// Per-field failures under `FailureMode::FailOpen` leave the field in its
/// pre-operation state and add a warning here; one bad field never blocks
/// the whole record.
#[derive(Debug, Clone)]
pub struct RecordCipherOutcome {
    /// The record's fields after the operation
    pub fields: HashMap<String, Value>,

    /// One entry per field that was left in its pre-operation state
    pub warnings: Vec<String>,
}

/// Encrypts and decrypts individual record fields
pub struct FieldCipher {
    lifecycle: Arc<KeyLifecycleManager>,
    usage_log: Arc<dyn UsageLogStore>,
    aead: Arc<dyn FieldAead>,
    policy: CipherPolicy,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("lifecycle", &self.lifecycle)
            .field("policy", &self.policy.failure_mode)
            .finish()
    }
}

impl FieldCipher {
    /// Creates a new field cipher
    pub fn new(
        lifecycle: Arc<KeyLifecycleManager>,
        usage_log: Arc<dyn UsageLogStore>,
        policy: CipherPolicy,
    ) -> Self {
        Self {
            lifecycle,
            usage_log,
            aead: Arc::new(Aes256GcmFieldAead::new()),
            policy,
        }
    }

    /// Overrides the AEAD implementation
    pub fn with_aead(mut self, aead: Arc<dyn FieldAead>) -> Self {
        self.aead = aead;
        self
    }

    /// Returns the cipher policy
    pub fn policy(&self) -> &CipherPolicy {
        &self.policy
    }

    /// Encrypts one field value for a tenant
    ///
    /// The key purpose is resolved from the field name via the policy's
    /// classification table unless `purpose_hint` overrides it. A fresh
    /// nonce and salt are generated per call; the salt is bound into the
    /// AEAD tag as associated data.
    pub async fn encrypt_field(
        &self,
        field_name: &str,
        value: &str,
        purpose_hint: Option<KeyPurpose>,
        tenant_id: &str,
    ) -> Result<EncryptedPayload> {
        let _timer = Timer::new("fieldvault.cipher.encrypt");
        let start = Instant::now();

        let purpose = purpose_hint.unwrap_or_else(|| self.policy.purpose_for_field(field_name));

        let key = match self
            .lifecycle
            .get_or_create_active_key(tenant_id, purpose)
            .await
        {
            Ok(key) => key,
            Err(e) => {
                let entry = UsageLogEntry::failure(
                    "unresolved",
                    tenant_id,
                    CryptoOperation::Encrypt,
                    elapsed_ms(start),
                    format!("no active key for purpose {}: {}", purpose, e),
                );
                record_usage(&self.usage_log, entry).await;
                metrics::increment_counter("fieldvault.cipher.encrypt.error", 1);

                return Err(Error::KeyUnavailable(format!(
                    "no active key for tenant={} purpose={}: {}",
                    tenant_id, purpose, e
                )));
            }
        };

        let iv = util::get_rand_bytes(GCM_NONCE_SIZE);
        let salt = util::get_rand_bytes(SALT_SIZE);

        let sealed = key.with_bytes(|key_bytes| {
            self.aead.seal(key_bytes, &iv, &salt, value.as_bytes())
        });

        let sealed = match sealed {
            Ok(sealed) => sealed,
            Err(e) => {
                let entry = UsageLogEntry::failure(
                    &key.key_id,
                    tenant_id,
                    CryptoOperation::Encrypt,
                    elapsed_ms(start),
                    e.to_string(),
                );
                record_usage(&self.usage_log, entry).await;
                metrics::increment_counter("fieldvault.cipher.encrypt.error", 1);
                return Err(e);
            }
        };

        let metadata = PayloadMetadata::new(&sealed.ciphertext);
        let payload = EncryptedPayload {
            key_id: key.key_id.clone(),
            ciphertext: sealed.ciphertext,
            iv,
            auth_tag: sealed.tag,
            salt,
            metadata,
        };

        let entry = UsageLogEntry::success(
            &key.key_id,
            tenant_id,
            CryptoOperation::Encrypt,
            elapsed_ms(start),
        );
        record_usage(&self.usage_log, entry).await;
        metrics::increment_counter("fieldvault.cipher.encrypt", 1);

        Ok(payload)
    }

    /// Decrypts one serialized payload for a tenant
    ///
    /// The key is resolved purely by the id embedded in the payload;
    /// retired keys decrypt exactly as active ones do.
    pub async fn decrypt_field(&self, serialized: &str, tenant_id: &str) -> Result<String> {
        let _timer = Timer::new("fieldvault.cipher.decrypt");
        let start = Instant::now();

        let payload: EncryptedPayload = serialized.parse()?;

        let result = self.decrypt_payload(&payload, tenant_id).await;

        let entry = match &result {
            Ok(_) => UsageLogEntry::success(
                &payload.key_id,
                tenant_id,
                CryptoOperation::Decrypt,
                elapsed_ms(start),
            ),
            Err(e) => UsageLogEntry::failure(
                &payload.key_id,
                tenant_id,
                CryptoOperation::Decrypt,
                elapsed_ms(start),
                e.to_string(),
            ),
        };
        record_usage(&self.usage_log, entry).await;

        match &result {
            Ok(_) => metrics::increment_counter("fieldvault.cipher.decrypt", 1),
            Err(_) => metrics::increment_counter("fieldvault.cipher.decrypt.error", 1),
        }

        result
    }

    async fn decrypt_payload(
        &self,
        payload: &EncryptedPayload,
        tenant_id: &str,
    ) -> Result<String> {
        let key = self
            .lifecycle
            .load_key(&payload.key_id)
            .await?
            .filter(|k| k.tenant_id == tenant_id)
            .ok_or_else(|| {
                Error::KeyUnavailable(format!(
                    "key {} not found for tenant {}",
                    payload.key_id, tenant_id
                ))
            })?;

        let plaintext = key.with_bytes(|key_bytes| {
            self.aead.open(
                key_bytes,
                &payload.iv,
                &payload.salt,
                &payload.ciphertext,
                &payload.auth_tag,
            )
        })?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Crypto("decrypted value is not valid UTF-8".into()))
    }

    /// Encrypts the sensitive fields of one record
    ///
    /// Non-string and absent values are passed through untouched, as are
    /// fields the classification table does not mark sensitive. Per-field
    /// failures follow the policy's failure mode.
    pub async fn encrypt_record(
        &self,
        table_name: &str,
        record_id: &str,
        fields: &HashMap<String, Value>,
        tenant_id: &str,
    ) -> Result<RecordCipherOutcome> {
        let mut out = HashMap::with_capacity(fields.len());
        let mut warnings = Vec::new();

        for (name, value) in fields {
            let Some(plain) = value.as_str() else {
                out.insert(name.clone(), value.clone());
                continue;
            };

            if !self.policy.is_sensitive_field(name) || EncryptedPayload::is_encrypted(plain) {
                out.insert(name.clone(), value.clone());
                continue;
            }

            match self.encrypt_field(name, plain, None, tenant_id).await {
                Ok(payload) => {
                    out.insert(name.clone(), Value::String(payload.to_string()));
                }
                Err(e) => match self.policy.failure_mode {
                    FailureMode::FailOpen => {
                        warnings.push(format!(
                            "field {} of {}/{} left unencrypted: {}",
                            name, table_name, record_id, e
                        ));
                        out.insert(name.clone(), value.clone());
                    }
                    FailureMode::FailClosed => return Err(e),
                },
            }
        }

        if !warnings.is_empty() {
            log::warn!(
                "encrypt_record {}/{} for tenant={} completed with {} warning(s)",
                table_name,
                record_id,
                tenant_id,
                warnings.len()
            );
        }

        Ok(RecordCipherOutcome { fields: out, warnings })
    }

    /// Decrypts the encrypted fields of one record
    ///
    /// Values not recognized as payloads are passed through. Per-field
    /// failures follow the policy's failure mode; under fail-open the
    /// ciphertext stays in place.
    pub async fn decrypt_record(
        &self,
        table_name: &str,
        record_id: &str,
        fields: &HashMap<String, Value>,
        tenant_id: &str,
    ) -> Result<RecordCipherOutcome> {
        let mut out = HashMap::with_capacity(fields.len());
        let mut warnings = Vec::new();

        for (name, value) in fields {
            let Some(serialized) = value.as_str() else {
                out.insert(name.clone(), value.clone());
                continue;
            };

            if !EncryptedPayload::is_encrypted(serialized) {
                out.insert(name.clone(), value.clone());
                continue;
            }

            match self.decrypt_field(serialized, tenant_id).await {
                Ok(plain) => {
                    out.insert(name.clone(), Value::String(plain));
                }
                Err(e) => match self.policy.failure_mode {
                    FailureMode::FailOpen => {
                        warnings.push(format!(
                            "field {} of {}/{} left encrypted: {}",
                            name, table_name, record_id, e
                        ));
                        out.insert(name.clone(), value.clone());
                    }
                    FailureMode::FailClosed => return Err(e),
                },
            }
        }

        if !warnings.is_empty() {
            log::warn!(
                "decrypt_record {}/{} for tenant={} completed with {} warning(s)",
                table_name,
                record_id,
                tenant_id,
                warnings.len()
            );
        }

        Ok(RecordCipherOutcome { fields: out, warnings })
    }

    /// Encrypts a value and derives its search artifacts
    ///
    /// The search hash depends on the tenant salt, not the encryption key,
    /// so it survives key rotation. It is only stable across ciphers and
    /// process restarts when the policy carries a stable
    /// `search_salt_secret`; the default secret is random per policy.
    /// Substring tokens are emitted only when the policy opts in; see
    /// [`search`] for the leakage trade-off.
    pub async fn create_searchable_encryption(
        &self,
        value: &str,
        field_name: &str,
        tenant_id: &str,
    ) -> Result<SearchableField> {
        let payload = self.encrypt_field(field_name, value, None, tenant_id).await?;

        let salt = search::tenant_salt(&self.policy.search_salt_secret, tenant_id)?;
        let search_hash = search::search_hash(value, &salt);

        let search_tokens = if self.policy.enable_search_tokens {
            search::search_tokens(value)
        } else {
            Vec::new()
        };

        Ok(SearchableField {
            encrypted_value: payload.to_string(),
            search_hash,
            search_tokens,
        })
    }
}
