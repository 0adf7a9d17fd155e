//! End-to-end tests for key rotation and its interaction with previously
//! written ciphertext.

use fieldvault::cipher::FieldCipher;
use fieldvault::key::KeyStatus;
use fieldvault::lifecycle::KeyLifecycleManager;
use fieldvault::metastore::{InMemoryKeyStore, InMemoryUsageLog};
use fieldvault::monitor::{ComplianceMonitor, StaticCoverageSource};
use fieldvault::policy::{CipherPolicy, KeyPolicy};
use fieldvault::usage::CryptoOperation;
use fieldvault::{KeyStore, UsageLogStore};

use chrono::{Duration, Utc};
use std::sync::Arc;

struct Harness {
    cipher: FieldCipher,
    lifecycle: Arc<KeyLifecycleManager>,
    key_store: Arc<InMemoryKeyStore>,
    usage_log: Arc<InMemoryUsageLog>,
}

fn harness() -> Harness {
    let key_store = Arc::new(InMemoryKeyStore::new());
    let usage_log = Arc::new(InMemoryUsageLog::new());
    let lifecycle = Arc::new(KeyLifecycleManager::new(
        key_store.clone(),
        usage_log.clone(),
        KeyPolicy::new(),
    ));
    let cipher = FieldCipher::new(lifecycle.clone(), usage_log.clone(), CipherPolicy::new());

    Harness {
        cipher,
        lifecycle,
        key_store,
        usage_log,
    }
}

#[tokio::test]
async fn old_payloads_decrypt_after_two_forced_rotations() {
    let h = harness();

    let payload = h
        .cipher
        .encrypt_field("email", "dave@example.com", None, "tenant-1")
        .await
        .unwrap();
    let first_key_id = payload.key_id.clone();

    let first = h
        .lifecycle
        .rotate(&first_key_id, "tenant-1", true, true)
        .await
        .unwrap();
    let second = h
        .lifecycle
        .rotate(&first.new_key_id, "tenant-1", true, true)
        .await
        .unwrap();

    // Two retired generations and exactly one active key remain.
    let keys = h.key_store.load_all("tenant-1").await.unwrap();
    assert_eq!(keys.len(), 3);
    assert_eq!(
        keys.iter().filter(|k| k.status == KeyStatus::Retired).count(),
        2
    );
    let active: Vec<_> = keys
        .iter()
        .filter(|k| k.status == KeyStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].key_id, second.new_key_id);

    // Ciphertext written under the first key still decrypts; rotation
    // never re-encrypts stored payloads.
    let plaintext = h
        .cipher
        .decrypt_field(&payload.to_string(), "tenant-1")
        .await
        .unwrap();
    assert_eq!(plaintext, "dave@example.com");

    // New writes pick up the current active key.
    let fresh = h
        .cipher
        .encrypt_field("email", "dave@example.com", None, "tenant-1")
        .await
        .unwrap();
    assert_eq!(fresh.key_id, second.new_key_id);
}

#[tokio::test]
async fn rotation_persists_an_encrypted_backup_and_a_log_entry() {
    let h = harness();

    let payload = h
        .cipher
        .encrypt_field("ssn", "987-65-4321", None, "tenant-1")
        .await
        .unwrap();

    let outcome = h
        .lifecycle
        .rotate(&payload.key_id, "tenant-1", true, true)
        .await
        .unwrap();
    assert!(outcome.backup_created);
    assert_eq!(h.key_store.backup_count(), 1);

    let since = Utc::now() - Duration::minutes(5);
    let entries = h.usage_log.entries_since("tenant-1", since).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.operation == CryptoOperation::Rotate && e.success));
}

#[tokio::test]
async fn automatic_sweep_rotates_only_lapsed_keys() {
    use fieldvault::key::{KeyPurpose, KeyRecord};

    let h = harness();

    // Seed one key that lapsed yesterday and one fresh key.
    let mut lapsed = KeyRecord::generate("tenant-1", KeyPurpose::PersonalInfo, 90, true);
    lapsed.next_rotation = Utc::now() - Duration::days(1);
    h.key_store.insert_active(&lapsed).await.unwrap();

    let fresh = KeyRecord::generate("tenant-1", KeyPurpose::PaymentInfo, 90, true);
    h.key_store.insert_active(&fresh).await.unwrap();

    let sweep = h
        .lifecycle
        .process_automatic_rotations("tenant-1")
        .await
        .unwrap();

    assert_eq!(sweep.rotated_key_ids, vec![lapsed.key_id.clone()]);
    assert!(sweep.errors.is_empty());

    let old = h.key_store.load(&lapsed.key_id).await.unwrap().unwrap();
    assert_eq!(old.status, KeyStatus::Retired);
    let untouched = h.key_store.load(&fresh.key_id).await.unwrap().unwrap();
    assert_eq!(untouched.status, KeyStatus::Active);
}

#[tokio::test]
async fn monitor_sees_cipher_and_rotation_activity() {
    let h = harness();

    for i in 0..5 {
        let payload = h
            .cipher
            .encrypt_field("email", &format!("user{}@example.com", i), None, "tenant-1")
            .await
            .unwrap();
        h.cipher
            .decrypt_field(&payload.to_string(), "tenant-1")
            .await
            .unwrap();
    }

    let monitor = ComplianceMonitor::new(
        h.key_store.clone(),
        h.usage_log.clone(),
        Arc::new(StaticCoverageSource::default()),
    );

    let metrics = monitor
        .get_metrics("tenant-1", Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(metrics.encrypt_operations, 5);
    assert_eq!(metrics.decrypt_operations, 5);
    assert_eq!(metrics.failed_operations, 0);
    assert_eq!(metrics.compliance_score, 100.0);

    let report = monitor
        .generate_compliance_report("tenant-1", Duration::days(7))
        .await
        .unwrap();
    assert_eq!(report.overall_score, 100.0);
    assert!(report.violations.is_empty());
}
