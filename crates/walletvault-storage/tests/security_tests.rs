//! Security tests for the cipher codec, field encryption and key store
//!
//! Tests cover:
//! - AES-GCM round-trip and tamper detection over random inputs
//! - Tagged field round-trip through the encryption service
//! - Installation key creation, reuse and access policy selection
//! - Degraded mode on the compiled-in key

use proptest::prelude::*;
use std::sync::Arc;
use walletvault_storage::keystore::{
    AccessPolicy, KeyIdentifier, KeyManager, KeyProvider, KeySource, KeystoreCapabilities,
    MockKeystore, PlatformKeystore, StaticKeyProvider,
};
use walletvault_storage::security::{self, SymmetricKey, NONCE_SIZE, TAG_SIZE};
use walletvault_storage::{
    FieldEncryptionService, StoredField, ENCRYPTED_PREFIX, REDACTED_PLACEHOLDER,
};

// =============================================================================
// Strategies
// =============================================================================

fn field_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-zA-Z ,|~/\u{00e9}\u{4e2d}]{0,64}").unwrap()
}

fn key_strategy() -> impl Strategy<Value = SymmetricKey> {
    prop_oneof![
        prop::array::uniform32(any::<u8>())
            .prop_map(|bytes| SymmetricKey::from_bytes(&bytes).unwrap()),
        prop::array::uniform16(any::<u8>())
            .prop_map(|bytes| SymmetricKey::from_bytes(&bytes).unwrap()),
    ]
}

// =============================================================================
// Cipher codec properties
// =============================================================================

proptest! {
    /// Property: open(seal(p)) == p for any key size and plaintext
    #[test]
    fn prop_seal_open_roundtrip(key in key_strategy(), plaintext in field_strategy()) {
        let encoded = security::encrypt_string(&plaintext, &key).unwrap();
        prop_assert_eq!(security::decrypt_string(&encoded, &key), Some(plaintext));
    }

    /// Property: flipping any bit of the sealed buffer makes it unopenable
    #[test]
    fn prop_tamper_detected(
        plaintext in field_strategy(),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = SymmetricKey::generate();
        let mut sealed = security::seal(&key, plaintext.as_bytes()).unwrap();
        prop_assert_eq!(sealed.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let i = position.index(sealed.len());
        sealed[i] ^= 1 << bit;
        prop_assert!(security::open(&key, &sealed).is_none());
    }

    /// Property: tagged field round-trips through the encryption service
    #[test]
    fn prop_field_roundtrip(value in field_strategy()) {
        let provider = Arc::new(StaticKeyProvider::new(SymmetricKey::generate()));
        let service = FieldEncryptionService::with_legacy_storage_key(provider);

        let stored = service.encrypt_for_storage(&value).unwrap();
        if value.is_empty() {
            prop_assert_eq!(&stored, "");
        } else {
            prop_assert!(stored.starts_with(ENCRYPTED_PREFIX));
        }
        prop_assert_eq!(service.decrypt_from_storage(&stored), value);
    }
}

#[test]
fn test_wrong_key_is_indistinguishable_failure() {
    let sealed = security::encrypt_string("4111", &SymmetricKey::generate()).unwrap();
    assert_eq!(security::decrypt_string(&sealed, &SymmetricKey::generate()), None);
    assert_eq!(security::decrypt_string("not base64!", &SymmetricKey::generate()), None);
    assert_eq!(security::decrypt_string("", &SymmetricKey::generate()), None);
}

#[test]
fn test_nonces_are_fresh() {
    let key = SymmetricKey::generate();
    let a = security::seal(&key, b"same").unwrap();
    let b = security::seal(&key, b"same").unwrap();
    assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    assert_ne!(a, b);
}

#[test]
fn test_unknown_ciphertext_redacted_never_raw() {
    let provider = Arc::new(StaticKeyProvider::new(SymmetricKey::generate()));
    let service = FieldEncryptionService::with_legacy_storage_key(provider);

    let foreign = security::seal(&SymmetricKey::generate(), b"4111 1111 1111 1111").unwrap();
    let stored = StoredField::Ciphertext(foreign).to_storage_string();
    assert_eq!(service.decrypt_from_storage(&stored), REDACTED_PLACEHOLDER);
}

// =============================================================================
// Key store
// =============================================================================

#[test]
fn test_key_created_once_and_reused() {
    let keystore = Arc::new(MockKeystore::new());
    let manager = KeyManager::new(keystore.clone(), KeyIdentifier::default());

    let first = manager.get_or_create_key().unwrap();
    let second = manager.get_or_create_key().unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(first.bits(), 256);
    assert_eq!(keystore.store_calls(), 1);

    // A new manager over the same keystore reads the persisted key
    let reopened = KeyManager::new(keystore, KeyIdentifier::default());
    assert_eq!(reopened.get_or_create_key().unwrap().as_bytes(), first.as_bytes());
}

#[test]
fn test_biometric_policy_when_available() {
    let keystore = Arc::new(MockKeystore::with_capabilities(KeystoreCapabilities {
        has_secure_hardware: true,
        has_biometrics: true,
    }));
    let manager = KeyManager::new(keystore.clone(), KeyIdentifier::default());
    manager.get_or_create_key().unwrap();
    assert_eq!(
        keystore.policy_of(&KeyIdentifier::default()),
        Some(AccessPolicy::BiometryOrPasscodeThisDeviceOnly)
    );
}

#[test]
fn test_biometric_rejection_falls_back_to_unlock_policy() {
    let keystore = Arc::new(MockKeystore::with_capabilities(KeystoreCapabilities {
        has_secure_hardware: true,
        has_biometrics: true,
    }));
    keystore.reject_biometric_policy(true);

    let manager = KeyManager::new(keystore.clone(), KeyIdentifier::default());
    manager.get_or_create_key().unwrap();
    assert_eq!(
        keystore.policy_of(&KeyIdentifier::default()),
        Some(AccessPolicy::WhenUnlockedThisDeviceOnly)
    );
}

#[test]
fn test_degraded_mode_uses_legacy_key() {
    let keystore = Arc::new(MockKeystore::new());
    keystore.fail_store(true);

    let manager = KeyManager::new(keystore, KeyIdentifier::default())
        .with_fallback(SymmetricKey::legacy_storage());
    assert!(manager.get_or_create_key().is_err());

    let key = manager.current_key().unwrap();
    assert_eq!(key.as_bytes(), SymmetricKey::legacy_storage().as_bytes());
    assert_eq!(manager.key_source(), KeySource::Fallback);
}

#[test]
fn test_delete_key_is_idempotent() {
    let keystore = Arc::new(MockKeystore::new());
    let manager = KeyManager::new(keystore.clone(), KeyIdentifier::default());
    let first = manager.get_or_create_key().unwrap();

    assert!(manager.delete_key());
    // Nothing left to delete still counts as success
    assert!(manager.delete_key());
    assert!(keystore.retrieve(&KeyIdentifier::default()).unwrap().is_none());

    let second = manager.get_or_create_key().unwrap();
    assert_ne!(first.as_bytes(), second.as_bytes());
}
