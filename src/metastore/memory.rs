use crate::anonymize::PseudonymizationMapping;
use crate::error::Result;
use crate::key::{KeyBackup, KeyPurpose, KeyRecord, KeyStatus};
use crate::usage::UsageLogEntry;
use crate::{KeyStore, MappingStore, UsageLogStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// An in-memory implementation of the KeyStore trait
///
/// Useful for tests and embedding; keys are lost when the process
/// terminates, so production deployments should back this trait with
/// durable storage.
pub struct InMemoryKeyStore {
    /// All key records by key id, active and retired alike
    keys: Arc<RwLock<HashMap<String, KeyRecord>>>,

    /// Encrypted key backups, append-only
    backups: Arc<RwLock<Vec<KeyBackup>>>,
}

impl InMemoryKeyStore {
    /// Creates a new InMemoryKeyStore
    pub fn new() -> Self {
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
            backups: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Returns the number of persisted key backups
    pub fn backup_count(&self) -> usize {
        self.backups.read().unwrap().len()
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryKeyStore")
            .field("keys", &self.keys.read().unwrap().len())
            .field("backups", &self.backups.read().unwrap().len())
            .finish()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn load(&self, key_id: &str) -> Result<Option<KeyRecord>> {
        let keys = self.keys.read().unwrap();
        Ok(keys.get(key_id).cloned())
    }

    async fn load_active(
        &self,
        tenant_id: &str,
        purpose: KeyPurpose,
    ) -> Result<Option<KeyRecord>> {
        let keys = self.keys.read().unwrap();

        let active = keys
            .values()
            .find(|k| {
                k.tenant_id == tenant_id && k.purpose == purpose && k.status == KeyStatus::Active
            })
            .cloned();

        Ok(active)
    }

    async fn insert_active(&self, record: &KeyRecord) -> Result<bool> {
        let mut keys = self.keys.write().unwrap();

        // The slot check and the insert happen under one write lock; this is
        // the compare-and-swap that serializes concurrent first-encrypt
        // callers racing to create a slot's first key.
        let occupied = keys.values().any(|k| {
            k.tenant_id == record.tenant_id
                && k.purpose == record.purpose
                && k.status == KeyStatus::Active
        });

        if occupied {
            return Ok(false);
        }

        keys.insert(record.key_id.clone(), record.clone());
        Ok(true)
    }

    async fn rotate_active(
        &self,
        old_key_id: &str,
        new_record: &KeyRecord,
        retired_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut keys = self.keys.write().unwrap();

        // Retire-and-replace happens atomically under the write lock: no
        // reader ever observes the slot with zero or two active keys.
        match keys.get_mut(old_key_id) {
            Some(old) if old.status == KeyStatus::Active => {
                old.status = KeyStatus::Retired;
                old.retired_at = Some(retired_at);
            }
            _ => return Ok(false),
        }

        keys.insert(new_record.key_id.clone(), new_record.clone());
        Ok(true)
    }

    async fn load_all(&self, tenant_id: &str) -> Result<Vec<KeyRecord>> {
        let keys = self.keys.read().unwrap();

        Ok(keys
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn store_backup(&self, backup: &KeyBackup) -> Result<()> {
        let mut backups = self.backups.write().unwrap();
        backups.push(backup.clone());
        Ok(())
    }
}

/// An in-memory, append-only implementation of the UsageLogStore trait
pub struct InMemoryUsageLog {
    entries: Arc<RwLock<Vec<UsageLogEntry>>>,
}

impl InMemoryUsageLog {
    /// Creates a new InMemoryUsageLog
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Returns the total number of logged entries
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Returns true if no entries have been logged
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for InMemoryUsageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryUsageLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryUsageLog")
            .field("entries", &self.entries.read().unwrap().len())
            .finish()
    }
}

#[async_trait]
impl UsageLogStore for InMemoryUsageLog {
    async fn append(&self, entry: UsageLogEntry) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.push(entry);
        Ok(())
    }

    async fn entries_since(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UsageLogEntry>> {
        let entries = self.entries.read().unwrap();

        Ok(entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.timestamp >= since)
            .cloned()
            .collect())
    }
}

/// An in-memory implementation of the MappingStore trait
pub struct InMemoryMappingStore {
    mappings: Arc<RwLock<HashMap<String, PseudonymizationMapping>>>,
}

impl InMemoryMappingStore {
    /// Creates a new InMemoryMappingStore
    pub fn new() -> Self {
        Self {
            mappings: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryMappingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryMappingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMappingStore")
            .field("mappings", &self.mappings.read().unwrap().len())
            .finish()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn store(&self, mapping: &PseudonymizationMapping) -> Result<()> {
        let mut mappings = self.mappings.write().unwrap();
        mappings.insert(mapping.mapping_id.clone(), mapping.clone());
        Ok(())
    }

    async fn load(&self, mapping_id: &str) -> Result<Option<PseudonymizationMapping>> {
        let mappings = self.mappings.read().unwrap();
        Ok(mappings.get(mapping_id).cloned())
    }
}
