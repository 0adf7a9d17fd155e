//! Key types for the fieldvault library

use crate::error::{Error, Result};
use crate::util;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

/// Size of AES-256 key material in bytes
pub const AES256_KEY_SIZE: usize = 32;

/// Classification of the data category a key is scoped to
///
/// A key created for one purpose is never used for another; purpose
/// isolation bounds the blast radius of a compromised key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyPurpose {
    UserData,
    PersonalInfo,
    PaymentInfo,
    SystemConfig,
}

impl std::fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyPurpose::UserData => write!(f, "USER_DATA"),
            KeyPurpose::PersonalInfo => write!(f, "PERSONAL_INFO"),
            KeyPurpose::PaymentInfo => write!(f, "PAYMENT_INFO"),
            KeyPurpose::SystemConfig => write!(f, "SYSTEM_CONFIG"),
        }
    }
}

/// Lifecycle status of a key
///
/// `Retired` is terminal. Retired keys are retained forever for
/// decrypt-only use against historical payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    Active,
    Retired,
}

/// Raw symmetric key bytes held in memory
///
/// The material never leaves the struct except through [`KeyMaterial::with_bytes`],
/// is wiped on drop, and is excluded from both `Debug` output and serde.
#[derive(Clone)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    /// Wraps existing key bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Generates fresh cryptographically secure random material
    pub fn generate() -> Self {
        Self {
            bytes: util::get_rand_bytes(AES256_KEY_SIZE),
        }
    }

    /// Returns the material length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the material is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Provides temporary access to the key bytes
    pub fn with_bytes<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        action(&self.bytes)
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"<hidden>")
            .finish()
    }
}

/// One symmetric encryption key with its rotation policy and status
#[derive(Debug, Clone)]
pub struct KeyRecord {
    /// Globally unique opaque identifier, immutable once created
    pub key_id: String,

    /// Tenant the key belongs to
    pub tenant_id: String,

    /// Data category the key is scoped to
    pub purpose: KeyPurpose,

    /// Raw key bytes; never serialized outside the metastore boundary
    pub material: KeyMaterial,

    /// Current lifecycle status
    pub status: KeyStatus,

    /// Timestamp when the key was created
    pub created_at: DateTime<Utc>,

    /// Rotation cycle length in days
    pub rotation_cycle_days: i64,

    /// When the key is next due for rotation
    pub next_rotation: DateTime<Utc>,

    /// Whether the automatic rotation sweep picks this key up
    pub auto_rotate: bool,

    /// When the key was retired, if it has been
    pub retired_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    /// Generates a new active key for a (tenant, purpose) slot
    pub fn generate(
        tenant_id: impl Into<String>,
        purpose: KeyPurpose,
        rotation_cycle_days: i64,
        auto_rotate: bool,
    ) -> Self {
        let now = Utc::now();

        Self {
            key_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            purpose,
            material: KeyMaterial::generate(),
            status: KeyStatus::Active,
            created_at: now,
            rotation_cycle_days,
            next_rotation: now + Duration::days(rotation_cycle_days),
            auto_rotate,
            retired_at: None,
        }
    }

    /// Returns true if the key is active
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    /// Returns true if the key's scheduled rotation time has passed
    pub fn is_rotation_due(&self, now: DateTime<Utc>) -> bool {
        self.next_rotation <= now
    }

    /// Provides temporary access to the key bytes
    pub fn with_bytes<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        if self.material.len() != AES256_KEY_SIZE {
            return Err(Error::Crypto(format!(
                "key {} has invalid material length",
                self.key_id
            )));
        }
        self.material.with_bytes(action)
    }
}

/// Encrypted copy of a retired key's material, persisted at rotation time
///
/// The backup is sealed under the replacement key so recovering it requires
/// access to the live key hierarchy, not just the backup store.
#[derive(Debug, Clone)]
pub struct KeyBackup {
    /// Id of the key whose material is backed up
    pub key_id: String,

    /// Id of the key the backup is sealed under
    pub wrapped_by: String,

    /// Sealed material (nonce followed by ciphertext and tag)
    pub sealed_material: Vec<u8>,

    /// When the backup was created
    pub created_at: DateTime<Utc>,
}
