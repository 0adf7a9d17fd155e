//! Key lifecycle management
//!
//! Each (tenant, purpose) slot moves through `NO_KEY -> ACTIVE -> RETIRED`.
//! Retirement is terminal; a new active key is created on next need. Old
//! ciphertext is never re-encrypted: rotation only affects which key new
//! writes use, and decrypt paths keep working against retired keys
//! indefinitely.

use crate::crypto::{Aes256GcmFieldAead, FieldAead, GCM_NONCE_SIZE};
use crate::error::{Error, Result};
use crate::key::{KeyBackup, KeyPurpose, KeyRecord, KeyStatus};
use crate::policy::KeyPolicy;
use crate::usage::{record_usage, CryptoOperation, UsageLogEntry};
use crate::{util, KeyStore, UsageLogStore};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Result of one key rotation
#[derive(Debug, Clone, Serialize)]
pub struct RotationOutcome {
    pub old_key_id: String,
    pub new_key_id: String,
    pub rotated_at: DateTime<Utc>,
    pub backup_created: bool,
}

/// One key's failure inside an automatic rotation sweep
#[derive(Debug, Clone, Serialize)]
pub struct RotationFailure {
    pub key_id: String,
    pub error: String,
}

/// Result of an automatic rotation sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct RotationSweep {
    pub rotated_key_ids: Vec<String>,
    pub errors: Vec<RotationFailure>,
}

/// Selects active keys per purpose and executes rotation
pub struct KeyLifecycleManager {
    store: Arc<dyn KeyStore>,
    usage_log: Arc<dyn UsageLogStore>,
    policy: KeyPolicy,
    aead: Arc<dyn FieldAead>,
}

impl std::fmt::Debug for KeyLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLifecycleManager")
            .field("store", &self.store)
            .field("policy", &self.policy)
            .finish()
    }
}

impl KeyLifecycleManager {
    /// Creates a new lifecycle manager
    pub fn new(
        store: Arc<dyn KeyStore>,
        usage_log: Arc<dyn UsageLogStore>,
        policy: KeyPolicy,
    ) -> Self {
        Self {
            store,
            usage_log,
            policy,
            aead: Arc::new(Aes256GcmFieldAead::new()),
        }
    }

    /// Overrides the AEAD used to seal key backups
    pub fn with_aead(mut self, aead: Arc<dyn FieldAead>) -> Self {
        self.aead = aead;
        self
    }

    /// Returns the current active key for a (tenant, purpose) slot,
    /// creating one if the slot has never held a key
    ///
    /// Creation is serialized through the store's insert CAS: when two
    /// callers race, the loser discards its candidate and adopts the
    /// winner's key.
    pub async fn get_or_create_active_key(
        &self,
        tenant_id: &str,
        purpose: KeyPurpose,
    ) -> Result<KeyRecord> {
        if let Some(key) = self.store.load_active(tenant_id, purpose).await? {
            return Ok(key);
        }

        let candidate = KeyRecord::generate(
            tenant_id,
            purpose,
            self.policy.rotation_cycle_days,
            self.policy.auto_rotate,
        );

        if self.store.insert_active(&candidate).await? {
            log::debug!(
                "created key {} for tenant={} purpose={}",
                candidate.key_id,
                tenant_id,
                purpose
            );
            return Ok(candidate);
        }

        self.store
            .load_active(tenant_id, purpose)
            .await?
            .ok_or_else(|| {
                Error::Metastore(format!(
                    "lost creation race for tenant={} purpose={} but no active key found",
                    tenant_id, purpose
                ))
            })
    }

    /// Rotates a key: the old key is retired, a new active key takes over
    /// the slot, and optionally an encrypted backup of the old material is
    /// persisted
    ///
    /// Unless `force` is set, rotation is refused with
    /// [`Error::RotationNotDue`] until the key's scheduled rotation time.
    pub async fn rotate(
        &self,
        key_id: &str,
        tenant_id: &str,
        force: bool,
        backup: bool,
    ) -> Result<RotationOutcome> {
        let start = Instant::now();

        let outcome = self.rotate_inner(key_id, tenant_id, force, backup).await;

        let entry = match &outcome {
            Ok(o) => UsageLogEntry::success(
                &o.old_key_id,
                tenant_id,
                CryptoOperation::Rotate,
                crate::usage::elapsed_ms(start),
            ),
            Err(e) => UsageLogEntry::failure(
                key_id,
                tenant_id,
                CryptoOperation::Rotate,
                crate::usage::elapsed_ms(start),
                e.to_string(),
            ),
        };
        record_usage(&self.usage_log, entry).await;

        outcome
    }

    async fn rotate_inner(
        &self,
        key_id: &str,
        tenant_id: &str,
        force: bool,
        backup: bool,
    ) -> Result<RotationOutcome> {
        let old = self
            .store
            .load(key_id)
            .await?
            .ok_or_else(|| Error::KeyUnavailable(format!("key {} not found", key_id)))?;

        if old.tenant_id != tenant_id {
            return Err(Error::KeyUnavailable(format!(
                "key {} does not belong to tenant {}",
                key_id, tenant_id
            )));
        }

        if old.status == KeyStatus::Retired {
            return Err(Error::InvalidArgument(format!(
                "key {} is already retired",
                key_id
            )));
        }

        let now = Utc::now();
        if !force && !old.is_rotation_due(now) {
            return Err(Error::RotationNotDue {
                key_id: key_id.to_string(),
                next_rotation: old.next_rotation,
            });
        }

        let new = KeyRecord::generate(
            tenant_id,
            old.purpose,
            old.rotation_cycle_days,
            old.auto_rotate,
        );

        // Seal the backup before touching store state; a crypto failure here
        // must leave the slot untouched.
        let sealed_backup = if backup {
            Some(self.seal_backup(&old, &new, now)?)
        } else {
            None
        };

        let swapped = self.store.rotate_active(key_id, &new, now).await?;
        if !swapped {
            return Err(Error::Metastore(format!(
                "key {} was rotated concurrently",
                key_id
            )));
        }

        let mut backup_created = false;
        if let Some(backup_record) = sealed_backup {
            match self.store.store_backup(&backup_record).await {
                Ok(()) => backup_created = true,
                Err(e) => {
                    // Rotation itself succeeded; a failed backup write is
                    // reported but does not roll the slot back.
                    log::warn!("backup persist failed for key {}: {}", key_id, e);
                }
            }
        }

        log::debug!(
            "rotated key {} -> {} for tenant={} purpose={}",
            old.key_id,
            new.key_id,
            tenant_id,
            old.purpose
        );

        Ok(RotationOutcome {
            old_key_id: old.key_id,
            new_key_id: new.key_id,
            rotated_at: now,
            backup_created,
        })
    }

    fn seal_backup(
        &self,
        old: &KeyRecord,
        new: &KeyRecord,
        now: DateTime<Utc>,
    ) -> Result<KeyBackup> {
        let nonce = util::get_rand_bytes(GCM_NONCE_SIZE);

        let sealed = new.with_bytes(|new_key| {
            old.with_bytes(|old_material| {
                self.aead
                    .seal(new_key, &nonce, old.key_id.as_bytes(), old_material)
            })
        })?;

        let mut sealed_material =
            Vec::with_capacity(nonce.len() + sealed.ciphertext.len() + sealed.tag.len());
        sealed_material.extend_from_slice(&nonce);
        sealed_material.extend_from_slice(&sealed.ciphertext);
        sealed_material.extend_from_slice(&sealed.tag);

        Ok(KeyBackup {
            key_id: old.key_id.clone(),
            wrapped_by: new.key_id.clone(),
            sealed_material,
            created_at: now,
        })
    }

    /// Rotates every auto-rotate key whose schedule has lapsed
    ///
    /// Keys are processed independently; one key's failure is captured and
    /// the sweep continues.
    pub async fn process_automatic_rotations(&self, tenant_id: &str) -> Result<RotationSweep> {
        let now = Utc::now();
        let keys = self.store.load_all(tenant_id).await?;

        let mut sweep = RotationSweep::default();

        for key in keys
            .iter()
            .filter(|k| k.is_active() && k.auto_rotate && k.next_rotation < now)
        {
            match self.rotate(&key.key_id, tenant_id, false, true).await {
                Ok(outcome) => sweep.rotated_key_ids.push(outcome.old_key_id),
                Err(e) => sweep.errors.push(RotationFailure {
                    key_id: key.key_id.clone(),
                    error: e.to_string(),
                }),
            }
        }

        Ok(sweep)
    }

    /// Returns the tenant's active keys whose rotation is overdue
    pub async fn overdue_keys(&self, tenant_id: &str) -> Result<Vec<KeyRecord>> {
        let now = Utc::now();
        let keys = self.store.load_all(tenant_id).await?;

        Ok(keys
            .into_iter()
            .filter(|k| k.is_active() && k.is_rotation_due(now))
            .collect())
    }

    /// Loads a key by id regardless of status
    pub(crate) async fn load_key(&self, key_id: &str) -> Result<Option<KeyRecord>> {
        self.store.load(key_id).await
    }
}
