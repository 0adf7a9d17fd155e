//! # Field-Level Encryption Library
//!
//! `fieldvault` provides field-level encryption and privacy-preserving
//! data transformation for multi-tenant record stores.
//!
//! Each tenant holds one active AES-256-GCM key per key purpose
//! (`USER_DATA`, `PERSONAL_INFO`, `PAYMENT_INFO`, `SYSTEM_CONFIG`).
//! Encrypted fields serialize to a self-describing `ENC:` payload that
//! names the key it was sealed under, so rotation never rewrites stored
//! ciphertext: retired keys keep decrypting old payloads while new writes
//! pick up the replacement key. Alongside the cipher, the crate carries an
//! anonymization engine (suppression, generalization, keyed
//! pseudonymization) and a read-only compliance monitor that derives
//! metrics, alerts, and reports from the append-only usage log.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use fieldvault::cipher::FieldCipher;
//! use fieldvault::lifecycle::KeyLifecycleManager;
//! use fieldvault::metastore::{InMemoryKeyStore, InMemoryUsageLog};
//! use fieldvault::policy::{CipherPolicy, KeyPolicy};
//! use std::sync::Arc;
//!
//! # async fn example() -> fieldvault::Result<()> {
//! let key_store = Arc::new(InMemoryKeyStore::new());
//! let usage_log = Arc::new(InMemoryUsageLog::new());
//!
//! let lifecycle = Arc::new(KeyLifecycleManager::new(
//!     key_store,
//!     usage_log.clone(),
//!     KeyPolicy::new(),
//! ));
//! let cipher = FieldCipher::new(lifecycle, usage_log, CipherPolicy::new());
//!
//! // Encrypt a field; the purpose is classified from the field name.
//! let payload = cipher
//!     .encrypt_field("email", "alice@example.com", None, "tenant-1")
//!     .await?;
//!
//! // Decrypt it back under the same tenant.
//! let plaintext = cipher.decrypt_field(&payload.to_string(), "tenant-1").await?;
//! assert_eq!(plaintext, "alice@example.com");
//! # Ok(())
//! # }
//! ```

pub mod anonymize;
pub mod cipher;
pub mod crypto;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod metastore;
pub mod metrics;
pub mod monitor;
pub mod payload;
pub mod policy;
pub mod usage;
pub mod util;

// Re-export key types
pub use crate::anonymize::{AnonymizationEngine, AnonymizationResult, AnonymizationTechnique};
pub use crate::cipher::{FieldCipher, SearchableField};
pub use crate::error::{Error, Result};
pub use crate::key::{KeyPurpose, KeyRecord, KeyStatus, AES256_KEY_SIZE};
pub use crate::lifecycle::KeyLifecycleManager;
pub use crate::metrics::{disable_metrics, metrics_enabled, set_metrics_provider, MetricsProvider};
pub use crate::monitor::{Alert, AlertKind, AlertSeverity, ComplianceMonitor};
pub use crate::payload::EncryptedPayload;
pub use crate::policy::{CipherPolicy, FailureMode, KeyPolicy};

use crate::anonymize::{PseudonymizationMapping, Record};
use crate::key::KeyBackup;
use crate::usage::UsageLogEntry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Key store interface for persisting key records and backups
///
/// `insert_active` and `rotate_active` return `false` instead of writing
/// when another caller got there first; both must be atomic so a slot is
/// never observed with zero or two active keys.
#[async_trait]
pub trait KeyStore: Send + Sync + fmt::Debug {
    /// Loads a key by id, active or retired
    async fn load(&self, key_id: &str) -> Result<Option<KeyRecord>>;

    /// Loads the active key for a (tenant, purpose) slot
    async fn load_active(&self, tenant_id: &str, purpose: KeyPurpose)
        -> Result<Option<KeyRecord>>;

    /// Inserts a new active key, unless the slot already has one
    ///
    /// Returns true if the key was stored, false if an active key already
    /// occupies the slot
    async fn insert_active(&self, record: &KeyRecord) -> Result<bool>;

    /// Atomically retires the old key and inserts its replacement
    ///
    /// Returns false without writing when the old key is missing or
    /// already retired
    async fn rotate_active(
        &self,
        old_key_id: &str,
        new_record: &KeyRecord,
        retired_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Loads every key record belonging to a tenant
    async fn load_all(&self, tenant_id: &str) -> Result<Vec<KeyRecord>>;

    /// Persists an encrypted key backup
    async fn store_backup(&self, backup: &KeyBackup) -> Result<()>;
}

/// Append-only store for usage log entries
#[async_trait]
pub trait UsageLogStore: Send + Sync + fmt::Debug {
    /// Appends one entry; entries are never mutated afterwards
    async fn append(&self, entry: UsageLogEntry) -> Result<()>;

    /// Returns a tenant's entries at or after the given instant
    async fn entries_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageLogEntry>>;
}

/// Store for pseudonymization mappings
#[async_trait]
pub trait MappingStore: Send + Sync + fmt::Debug {
    /// Persists a mapping under its mapping id
    async fn store(&self, mapping: &PseudonymizationMapping) -> Result<()>;

    /// Loads a mapping by id
    async fn load(&self, mapping_id: &str) -> Result<Option<PseudonymizationMapping>>;
}

/// Batched record access for bulk anonymization
///
/// The record layer itself lives outside this crate; bulk runs only need
/// paged reads and writes over it.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetches up to `limit` records starting at `offset`
    async fn fetch_batch(&self, offset: usize, limit: usize) -> Result<Vec<Record>>;

    /// Writes a transformed batch back, replacing the records at `offset`
    async fn store_batch(&self, offset: usize, records: Vec<Record>) -> Result<()>;

    /// Total number of records available
    async fn total_records(&self) -> Result<usize>;
}

/// Reports encryption coverage and audit gaps for the compliance monitor
///
/// Field inventory lives with the external record layer, so coverage is
/// injected rather than computed here.
#[async_trait]
pub trait CoverageSource: Send + Sync + fmt::Debug {
    /// Fraction of sensitive fields currently encrypted, in [0, 1]
    async fn encryption_coverage(&self, tenant_id: &str) -> Result<f64>;

    /// Number of known audit trail gaps
    async fn audit_gaps(&self, tenant_id: &str) -> Result<u32>;
}
