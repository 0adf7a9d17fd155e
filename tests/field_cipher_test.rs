//! End-to-end tests for field encryption, payload handling, and search
//! artifacts.

use fieldvault::cipher::FieldCipher;
use fieldvault::lifecycle::KeyLifecycleManager;
use fieldvault::metastore::{InMemoryKeyStore, InMemoryUsageLog};
use fieldvault::payload::{EncryptedPayload, PAYLOAD_PREFIX};
use fieldvault::policy::{CipherPolicy, KeyPolicy};
use fieldvault::Error;

use std::sync::Arc;

fn build_cipher() -> (FieldCipher, Arc<KeyLifecycleManager>, Arc<InMemoryKeyStore>) {
    let key_store = Arc::new(InMemoryKeyStore::new());
    let usage_log = Arc::new(InMemoryUsageLog::new());
    let lifecycle = Arc::new(KeyLifecycleManager::new(
        key_store.clone(),
        usage_log.clone(),
        KeyPolicy::new(),
    ));
    let cipher = FieldCipher::new(
        lifecycle.clone(),
        usage_log,
        CipherPolicy::new().with_search_salt_secret(b"integration-salt-secret".to_vec()),
    );
    (cipher, lifecycle, key_store)
}

#[tokio::test]
async fn serialized_payload_has_the_wire_shape() {
    let (cipher, _, _) = build_cipher();

    let payload = cipher
        .encrypt_field("email", "alice@example.com", None, "tenant-1")
        .await
        .unwrap();
    let serialized = payload.to_string();

    assert!(serialized.starts_with(PAYLOAD_PREFIX));

    let segments: Vec<&str> = serialized[PAYLOAD_PREFIX.len()..].split('.').collect();
    assert_eq!(segments.len(), 6);
    assert!(segments.iter().all(|s| !s.is_empty()));

    // Every segment past the key id is valid standard base64.
    use base64::{engine::general_purpose::STANDARD, Engine};
    for segment in &segments[1..] {
        STANDARD.decode(segment).unwrap();
    }

    // The serialized form parses back to an equivalent payload.
    let reparsed: EncryptedPayload = serialized.parse().unwrap();
    assert_eq!(reparsed.key_id, payload.key_id);
    assert_eq!(reparsed.ciphertext, payload.ciphertext);
}

#[tokio::test]
async fn decrypt_under_another_tenant_is_refused() {
    let (cipher, _, _) = build_cipher();

    let payload = cipher
        .encrypt_field("ssn", "123-45-6789", None, "tenant-1")
        .await
        .unwrap();

    let err = cipher
        .decrypt_field(&payload.to_string(), "tenant-2")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::KeyUnavailable(_)));

    // The owning tenant still decrypts.
    let plaintext = cipher
        .decrypt_field(&payload.to_string(), "tenant-1")
        .await
        .unwrap();
    assert_eq!(plaintext, "123-45-6789");
}

#[tokio::test]
async fn tampered_ciphertext_fails_authentication() {
    let (cipher, _, _) = build_cipher();

    let mut payload = cipher
        .encrypt_field("email", "bob@example.com", None, "tenant-1")
        .await
        .unwrap();
    payload.ciphertext[0] ^= 0x01;

    let err = cipher
        .decrypt_field(&payload.to_string(), "tenant-1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed(_)));
}

#[tokio::test]
async fn search_hash_survives_key_rotation() {
    let (cipher, lifecycle, _) = build_cipher();

    let before = cipher
        .create_searchable_encryption("alice@example.com", "email", "tenant-1")
        .await
        .unwrap();

    let purpose = cipher.policy().purpose_for_field("email");
    let active = lifecycle
        .get_or_create_active_key("tenant-1", purpose)
        .await
        .unwrap();
    lifecycle
        .rotate(&active.key_id, "tenant-1", true, false)
        .await
        .unwrap();

    let after = cipher
        .create_searchable_encryption("alice@example.com", "email", "tenant-1")
        .await
        .unwrap();

    // Same value, same tenant: the hash is key-independent and stable
    // across rotation even though the ciphertexts differ.
    assert_eq!(before.search_hash, after.search_hash);
    assert_ne!(before.encrypted_value, after.encrypted_value);

    // Both generations of ciphertext still decrypt.
    assert_eq!(
        cipher
            .decrypt_field(&before.encrypted_value, "tenant-1")
            .await
            .unwrap(),
        "alice@example.com"
    );
    assert_eq!(
        cipher
            .decrypt_field(&after.encrypted_value, "tenant-1")
            .await
            .unwrap(),
        "alice@example.com"
    );
}

#[tokio::test]
async fn search_hash_differs_across_tenants() {
    let (cipher, _, _) = build_cipher();

    let t1 = cipher
        .create_searchable_encryption("alice@example.com", "email", "tenant-1")
        .await
        .unwrap();
    let t2 = cipher
        .create_searchable_encryption("alice@example.com", "email", "tenant-2")
        .await
        .unwrap();

    assert_ne!(t1.search_hash, t2.search_hash);
}

#[tokio::test]
async fn record_round_trip_encrypts_only_sensitive_string_fields() {
    use serde_json::json;
    use std::collections::HashMap;

    let (cipher, _, _) = build_cipher();

    let record: HashMap<String, serde_json::Value> = [
        ("email".to_string(), json!("carol@example.com")),
        ("login_count".to_string(), json!(17)),
        ("note".to_string(), json!("hello")),
    ]
    .into_iter()
    .collect();

    let encrypted = cipher
        .encrypt_record("users", "r1", &record, "tenant-1")
        .await
        .unwrap();

    assert!(encrypted.warnings.is_empty());
    assert!(encrypted.fields["email"]
        .as_str()
        .unwrap()
        .starts_with(PAYLOAD_PREFIX));
    // Non-sensitive and non-string fields pass through untouched.
    assert_eq!(encrypted.fields["login_count"], json!(17));
    assert_eq!(encrypted.fields["note"], json!("hello"));

    let decrypted = cipher
        .decrypt_record("users", "r1", &encrypted.fields, "tenant-1")
        .await
        .unwrap();
    assert_eq!(decrypted.fields, record);
}
