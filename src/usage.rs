//! Append-only usage log types
//!
//! Every cryptographic operation produces one entry. Entries are never
//! mutated and are the read-only input to the compliance monitor.

use crate::UsageLogStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of cryptographic operation recorded in the usage log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CryptoOperation {
    Encrypt,
    Decrypt,
    Rotate,
}

/// Record of one cryptographic operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    /// Key the operation ran against
    pub key_id: String,

    /// Tenant the operation belongs to
    pub tenant_id: String,

    /// Operation kind
    pub operation: CryptoOperation,

    /// Whether the operation succeeded
    pub success: bool,

    /// When the operation completed
    pub timestamp: DateTime<Utc>,

    /// Wall-clock duration of the operation in milliseconds
    pub operation_time_ms: u64,

    /// Error summary for failed operations; never contains plaintext or
    /// key material
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UsageLogEntry {
    /// Creates an entry for a successful operation
    pub fn success(
        key_id: impl Into<String>,
        tenant_id: impl Into<String>,
        operation: CryptoOperation,
        operation_time_ms: u64,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            tenant_id: tenant_id.into(),
            operation,
            success: true,
            timestamp: Utc::now(),
            operation_time_ms,
            error: None,
        }
    }

    /// Creates an entry for a failed operation
    pub fn failure(
        key_id: impl Into<String>,
        tenant_id: impl Into<String>,
        operation: CryptoOperation,
        operation_time_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            tenant_id: tenant_id.into(),
            operation,
            success: false,
            timestamp: Utc::now(),
            operation_time_ms,
            error: Some(error.into()),
        }
    }
}

/// Appends a usage entry, falling back to the log facade on store failure
///
/// Usage logging never blocks or fails the cryptographic path, but a failed
/// append is not silently dropped either.
pub async fn record_usage(store: &Arc<dyn UsageLogStore>, entry: UsageLogEntry) {
    if let Err(e) = store.append(entry.clone()).await {
        log::error!(
            "usage log append failed: key_id={} tenant={} operation={:?} success={}: {}",
            entry.key_id,
            entry.tenant_id,
            entry.operation,
            entry.success,
            e
        );
    }
}

/// Convenience wrapper used by cipher and lifecycle code paths
pub(crate) fn elapsed_ms(start: std::time::Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_entry_has_no_error() {
        let entry = UsageLogEntry::success("k1", "t1", CryptoOperation::Encrypt, 3);
        assert!(entry.success);
        assert!(entry.error.is_none());
    }

    #[test]
    fn failure_entry_carries_error_context() {
        let entry =
            UsageLogEntry::failure("k1", "t1", CryptoOperation::Decrypt, 1, "tag mismatch");
        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("tag mismatch"));
    }

    #[test]
    fn operation_serializes_in_wire_case() {
        let json = serde_json::to_string(&CryptoOperation::Encrypt).unwrap();
        assert_eq!(json, "\"ENCRYPT\"");
    }

    #[test]
    fn record_usage_appends_to_the_store() {
        let log = Arc::new(crate::metastore::InMemoryUsageLog::new());
        let store: Arc<dyn UsageLogStore> = log.clone();

        tokio_test::block_on(record_usage(
            &store,
            UsageLogEntry::success("k1", "t1", CryptoOperation::Encrypt, 2),
        ));

        assert_eq!(log.len(), 1);
    }
}
