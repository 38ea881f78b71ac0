//! Field-level encryption for stored card values
//!
//! A stored sensitive field is either legacy plaintext or the tag prefix
//! `ENCRYPTED:` followed by base64 of the sealed buffer. The prefix is only
//! looked at here, at the storage boundary; everything else works with
//! [`StoredField`].

use crate::keystore::KeyProvider;
use crate::security::{self, SymmetricKey};
use crate::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Marks a stored value as ciphertext
pub const ENCRYPTED_PREFIX: &str = "ENCRYPTED:";

/// Shown in place of a value no known key can decrypt
pub const REDACTED_PLACEHOLDER: &str = "••••";

/// Pure prefix test
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Parsed form of a stored field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredField {
    /// Untagged value (pre-encryption installs)
    Plaintext(String),
    /// Tagged value with a decodable payload
    Ciphertext(Vec<u8>),
    /// Tagged value whose payload is not base64; kept verbatim
    Unreadable(String),
}

impl StoredField {
    /// Parse the on-disk representation
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(ENCRYPTED_PREFIX) {
            None => StoredField::Plaintext(raw.to_string()),
            Some(payload) => match STANDARD.decode(payload) {
                Ok(bytes) => StoredField::Ciphertext(bytes),
                Err(_) => StoredField::Unreadable(payload.to_string()),
            },
        }
    }

    /// Serialize to the on-disk representation
    pub fn to_storage_string(&self) -> String {
        match self {
            StoredField::Plaintext(value) => value.clone(),
            StoredField::Ciphertext(bytes) => {
                format!("{}{}", ENCRYPTED_PREFIX, STANDARD.encode(bytes))
            }
            StoredField::Unreadable(payload) => format!("{}{}", ENCRYPTED_PREFIX, payload),
        }
    }

    /// Whether the field carries the tag prefix
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, StoredField::Plaintext(_))
    }
}

/// What the migrator needs to know about a stored value
#[derive(Debug, PartialEq, Eq)]
pub enum FieldState {
    /// Empty string; never encrypted
    Empty,
    /// Legacy plaintext
    Plaintext,
    /// Opens under the current key
    Current,
    /// Opens only under a legacy key; carries the recovered plaintext
    Legacy(Zeroizing<String>),
    /// Tagged, but no candidate key opens it
    Unreadable,
}

/// Transparent encrypt-for-storage / decrypt-from-storage.
///
/// Stateless apart from the injected key provider; safe to share across threads.
pub struct FieldEncryptionService {
    provider: Arc<dyn KeyProvider>,
    legacy_keys: Vec<SymmetricKey>,
}

impl FieldEncryptionService {
    /// Create with an explicit list of legacy keys, tried in order after the current key
    pub fn new(provider: Arc<dyn KeyProvider>, legacy_keys: Vec<SymmetricKey>) -> Self {
        Self {
            provider,
            legacy_keys,
        }
    }

    /// Create with the compiled-in legacy storage key as the only legacy key
    pub fn with_legacy_storage_key(provider: Arc<dyn KeyProvider>) -> Self {
        Self::new(provider, vec![SymmetricKey::legacy_storage()])
    }

    /// Current key from the provider
    pub fn current_key(&self) -> Result<SymmetricKey> {
        self.provider.current_key()
    }

    /// Encrypt a value for storage.
    ///
    /// Empty values are returned unchanged. `None` when the current key is
    /// unavailable or encryption fails.
    pub fn encrypt_for_storage(&self, value: &str) -> Option<String> {
        if value.is_empty() {
            return Some(String::new());
        }

        let key = match self.provider.current_key() {
            Ok(key) => key,
            Err(e) => {
                tracing::error!("Cannot encrypt field for storage: {}", e);
                return None;
            }
        };

        match security::seal(&key, value.as_bytes()) {
            Ok(sealed) => Some(StoredField::Ciphertext(sealed).to_storage_string()),
            Err(e) => {
                tracing::error!("Failed to encrypt value for storage: {}", e);
                None
            }
        }
    }

    /// Decrypt a stored value.
    ///
    /// Untagged values pass through verbatim. A tagged value that no
    /// candidate key opens yields [`REDACTED_PLACEHOLDER`].
    pub fn decrypt_from_storage(&self, value: &str) -> String {
        let sealed = match StoredField::parse(value) {
            StoredField::Plaintext(plain) => return plain,
            StoredField::Ciphertext(bytes) => bytes,
            StoredField::Unreadable(_) => {
                tracing::error!("Stored value has a malformed encrypted payload");
                return REDACTED_PLACEHOLDER.to_string();
            }
        };

        let candidates = self.candidate_keys();
        match security::open_with_candidates(&candidates.keys, &sealed) {
            Some((index, plaintext)) => {
                if index >= candidates.legacy_start {
                    tracing::warn!(
                        "Decrypted with legacy key; value will be re-encrypted on next save or migration"
                    );
                }
                match String::from_utf8(plaintext.to_vec()) {
                    Ok(s) => s,
                    Err(_) => {
                        tracing::error!("Decrypted value is not valid UTF-8");
                        REDACTED_PLACEHOLDER.to_string()
                    }
                }
            }
            None => {
                tracing::error!("Failed to decrypt value with current and legacy keys");
                REDACTED_PLACEHOLDER.to_string()
            }
        }
    }

    /// Pure prefix test
    pub fn is_encrypted(&self, value: &str) -> bool {
        is_encrypted(value)
    }

    /// Classify a stored value against the current key and the legacy keys.
    ///
    /// Fails only when the current key is unavailable.
    pub fn classify(&self, value: &str) -> Result<FieldState> {
        let current = self.provider.current_key()?;
        Ok(self.classify_with(&current, value))
    }

    pub(crate) fn classify_with(&self, current: &SymmetricKey, value: &str) -> FieldState {
        if value.is_empty() {
            return FieldState::Empty;
        }

        let sealed = match StoredField::parse(value) {
            StoredField::Plaintext(_) => return FieldState::Plaintext,
            StoredField::Unreadable(_) => return FieldState::Unreadable,
            StoredField::Ciphertext(bytes) => bytes,
        };

        if security::open(current, &sealed).is_some() {
            return FieldState::Current;
        }

        match security::open_with_candidates(&self.legacy_keys, &sealed) {
            Some((_, plaintext)) => match String::from_utf8(plaintext.to_vec()) {
                Ok(s) => FieldState::Legacy(Zeroizing::new(s)),
                Err(_) => FieldState::Unreadable,
            },
            None => FieldState::Unreadable,
        }
    }

    /// Encrypt under an explicit key (the migrator resolves the key once per sweep)
    pub(crate) fn encrypt_with(&self, key: &SymmetricKey, value: &str) -> Result<String> {
        let sealed = security::seal(key, value.as_bytes())?;
        Ok(StoredField::Ciphertext(sealed).to_storage_string())
    }

    fn candidate_keys(&self) -> CandidateKeys {
        let mut keys = Vec::with_capacity(self.legacy_keys.len() + 1);
        match self.provider.current_key() {
            Ok(key) => keys.push(key),
            Err(e) => tracing::error!("Current key unavailable for decryption: {}", e),
        }
        let legacy_start = keys.len();
        keys.extend(self.legacy_keys.iter().cloned());
        CandidateKeys { keys, legacy_start }
    }
}

struct CandidateKeys {
    keys: Vec<SymmetricKey>,
    legacy_start: usize,
}
