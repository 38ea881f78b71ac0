//! Encrypted card storage for WalletVault
//!
//! Payment-card fields are encrypted one by one before they reach SQLite,
//! under a per-installation key held in the platform keystore.
//!
//! ## Components
//!
//! - **Key store**: get-or-create of the installation key with single-flight
//!   creation, biometric-or-passcode access policy when the device supports
//!   it, and a degraded mode on the compiled-in legacy key
//! - **Cipher codec**: AES-GCM over the combined `nonce ‖ ciphertext ‖ tag`
//!   buffer, base64 on the wire
//! - **Field encryption**: `ENCRYPTED:` tagged fields, decrypted with the
//!   current key and then each legacy key in turn
//! - **Key migration**: one sweep that moves plaintext and legacy-key fields
//!   to the current key, committed once
//! - **Share codes**: sealed, versioned card payloads for moving a card to
//!   another device

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod card_store;
pub mod config;
pub mod database;
pub mod encryption;
pub mod error;
pub mod key_migration;
pub mod keystore;
pub mod migrations;
pub mod models;
pub mod security;
pub mod share_code;

pub use card_store::{Card, CardStorage, SqliteCardStore};
pub use config::VaultConfig;
pub use database::Database;
pub use encryption::{
    is_encrypted, FieldEncryptionService, FieldState, StoredField, ENCRYPTED_PREFIX,
    REDACTED_PLACEHOLDER,
};
pub use error::{Error, Result};
pub use key_migration::{CardRecordStore, FieldUpdate, LegacyKeyMigrator, MigrationReport};
pub use keystore::{
    AccessPolicy, KeyIdentifier, KeyManager, KeyProvider, KeySource, KeystoreCapabilities,
    MockKeystore, PlatformKeystore, StaticKeyProvider,
};
pub use models::*;
pub use security::SymmetricKey;
pub use share_code::ShareCodeCodec;
