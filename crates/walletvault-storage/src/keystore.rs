//! Platform keystore integration for the card encryption key
//!
//! The installation key lives outside the card database, in the platform's
//! secure credential store (iOS Keychain, Android Keystore, libsecret, ...),
//! under a fixed (service, account) pair. This module defines:
//!
//! - [`PlatformKeystore`]: the seam a host implements over its native store
//! - [`MockKeystore`]: in-memory implementation with failure injection
//! - [`KeyManager`]: get-or-create with single-flight creation, policy
//!   fallback and the degraded fallback-key mode
//! - [`KeyProvider`]: what encryption consumers depend on instead of a global

use crate::security::{SymmetricKey, KEY_SIZE};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Default keychain service identifier
pub const DEFAULT_KEY_SERVICE: &str = "com.walletvault.encryptionkey";

/// Default keychain account identifier
pub const DEFAULT_KEY_ACCOUNT: &str = "cardDataEncryptionKey";

/// (service, account) pair naming a keystore entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyIdentifier {
    /// Service identifier
    pub service: String,
    /// Account identifier
    pub account: String,
}

impl KeyIdentifier {
    /// Create a key identifier
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl Default for KeyIdentifier {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_SERVICE, DEFAULT_KEY_ACCOUNT)
    }
}

/// Accessibility policy attached to a stored key.
///
/// Both policies keep the entry on this device (never synced or backed up)
/// and available only while the device is unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Available while unlocked
    WhenUnlockedThisDeviceOnly,
    /// Available while unlocked, after biometric or passcode authentication
    BiometryOrPasscodeThisDeviceOnly,
}

/// Platform capabilities for secure storage
#[derive(Debug, Clone, Default)]
pub struct KeystoreCapabilities {
    /// Has hardware-backed secure storage (TEE, StrongBox, Secure Enclave)
    pub has_secure_hardware: bool,
    /// Biometric or passcode gating can be attached to entries
    pub has_biometrics: bool,
}

/// Platform keystore abstraction
///
/// Implementations bridge to native platform code. Calls may block; hosts
/// should keep them off their interactive thread.
pub trait PlatformKeystore: Send + Sync {
    /// Get platform capabilities
    fn capabilities(&self) -> KeystoreCapabilities;

    /// Read raw key bytes. `Ok(None)` when no entry exists.
    fn retrieve(&self, id: &KeyIdentifier) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Persist raw key bytes under the given policy. Fails if an entry exists.
    fn store(&self, id: &KeyIdentifier, key: &[u8], policy: AccessPolicy) -> Result<()>;

    /// Remove an entry. `Ok(true)` if one was removed, `Ok(false)` if none existed.
    fn delete(&self, id: &KeyIdentifier) -> Result<bool>;
}

// =============================================================================
// Mock keystore
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct MockFailures {
    retrieve: bool,
    store: bool,
    biometric_policy: bool,
}

/// Mock keystore for testing and platforms without native integration
pub struct MockKeystore {
    capabilities: KeystoreCapabilities,
    entries: RwLock<HashMap<KeyIdentifier, (Zeroizing<Vec<u8>>, AccessPolicy)>>,
    failures: RwLock<MockFailures>,
    store_calls: Mutex<u32>,
}

impl MockKeystore {
    /// Create new mock keystore
    pub fn new() -> Self {
        Self::with_capabilities(KeystoreCapabilities::default())
    }

    /// Create with custom capabilities (for testing)
    pub fn with_capabilities(capabilities: KeystoreCapabilities) -> Self {
        Self {
            capabilities,
            entries: RwLock::new(HashMap::new()),
            failures: RwLock::new(MockFailures::default()),
            store_calls: Mutex::new(0),
        }
    }

    /// Make every `retrieve` fail
    pub fn fail_retrieve(&self, fail: bool) {
        self.failures.write().retrieve = fail;
    }

    /// Make every `store` fail
    pub fn fail_store(&self, fail: bool) {
        self.failures.write().store = fail;
    }

    /// Reject the biometric policy, as a device without enrolled biometrics does
    pub fn reject_biometric_policy(&self, reject: bool) {
        self.failures.write().biometric_policy = reject;
    }

    /// Policy the entry was stored with
    pub fn policy_of(&self, id: &KeyIdentifier) -> Option<AccessPolicy> {
        self.entries.read().get(id).map(|(_, policy)| *policy)
    }

    /// Number of `store` calls so far, successful or not
    pub fn store_calls(&self) -> u32 {
        *self.store_calls.lock()
    }

    /// Insert raw bytes directly, bypassing policy checks
    pub fn insert_raw(&self, id: &KeyIdentifier, bytes: &[u8]) {
        self.entries.write().insert(
            id.clone(),
            (
                Zeroizing::new(bytes.to_vec()),
                AccessPolicy::WhenUnlockedThisDeviceOnly,
            ),
        );
    }
}

impl Default for MockKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformKeystore for MockKeystore {
    fn capabilities(&self) -> KeystoreCapabilities {
        self.capabilities.clone()
    }

    fn retrieve(&self, id: &KeyIdentifier) -> Result<Option<Zeroizing<Vec<u8>>>> {
        if self.failures.read().retrieve {
            return Err(Error::Keystore("Mock retrieve failure".to_string()));
        }
        Ok(self.entries.read().get(id).map(|(bytes, _)| bytes.clone()))
    }

    fn store(&self, id: &KeyIdentifier, key: &[u8], policy: AccessPolicy) -> Result<()> {
        *self.store_calls.lock() += 1;

        let failures = *self.failures.read();
        if failures.store {
            return Err(Error::Keystore("Mock store failure".to_string()));
        }
        if policy == AccessPolicy::BiometryOrPasscodeThisDeviceOnly
            && (failures.biometric_policy || !self.capabilities.has_biometrics)
        {
            return Err(Error::Keystore(
                "Biometric access control not available".to_string(),
            ));
        }

        let mut entries = self.entries.write();
        if entries.contains_key(id) {
            return Err(Error::Keystore("Duplicate keystore item".to_string()));
        }
        entries.insert(id.clone(), (Zeroizing::new(key.to_vec()), policy));
        Ok(())
    }

    fn delete(&self, id: &KeyIdentifier) -> Result<bool> {
        Ok(self.entries.write().remove(id).is_some())
    }
}

// =============================================================================
// Key provider
// =============================================================================

/// Source of the current encryption key
pub trait KeyProvider: Send + Sync {
    /// Current key, or `Error::KeyUnavailable`
    fn current_key(&self) -> Result<SymmetricKey>;
}

/// Fixed key provider, for tests and for hosts that manage the key themselves
pub struct StaticKeyProvider(SymmetricKey);

impl StaticKeyProvider {
    /// Wrap a key
    pub fn new(key: SymmetricKey) -> Self {
        Self(key)
    }
}

impl KeyProvider for StaticKeyProvider {
    fn current_key(&self) -> Result<SymmetricKey> {
        Ok(self.0.clone())
    }
}

/// Where the key in use came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Not resolved yet
    Unresolved,
    /// Read from or created in the platform keystore
    Keystore,
    /// Compiled-in fallback; confidentiality against device compromise is lost
    Fallback,
}

struct KeyState {
    key: Option<SymmetricKey>,
    source: KeySource,
}

/// Owns the installation key's lifecycle in the platform keystore.
///
/// Construct once at startup and share through `Arc`. The create-if-absent
/// path is serialized, so concurrent first calls cannot create two keys.
pub struct KeyManager {
    keystore: Arc<dyn PlatformKeystore>,
    id: KeyIdentifier,
    fallback: Option<SymmetricKey>,
    state: Mutex<KeyState>,
}

impl KeyManager {
    /// Create a key manager with no degraded-mode fallback
    pub fn new(keystore: Arc<dyn PlatformKeystore>, id: KeyIdentifier) -> Self {
        Self {
            keystore,
            id,
            fallback: None,
            state: Mutex::new(KeyState {
                key: None,
                source: KeySource::Unresolved,
            }),
        }
    }

    /// Use `fallback` from [`KeyProvider::current_key`] when the keystore is unavailable
    pub fn with_fallback(mut self, fallback: SymmetricKey) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Keystore entry identifier
    pub fn key_id(&self) -> &KeyIdentifier {
        &self.id
    }

    /// Capabilities of the underlying keystore
    pub fn capabilities(&self) -> KeystoreCapabilities {
        self.keystore.capabilities()
    }

    /// Where the resolved key came from
    pub fn key_source(&self) -> KeySource {
        self.state.lock().source
    }

    /// Retrieve the key, creating and persisting one on first use.
    ///
    /// Never regenerates a key implicitly: an existing entry of the wrong
    /// size or a failing keystore read is `KeyUnavailable`.
    pub fn get_or_create_key(&self) -> Result<SymmetricKey> {
        let mut state = self.state.lock();
        if state.source == KeySource::Keystore {
            if let Some(key) = &state.key {
                return Ok(key.clone());
            }
        }

        let key = self.load_or_create()?;
        state.key = Some(key.clone());
        state.source = KeySource::Keystore;
        Ok(key)
    }

    fn load_or_create(&self) -> Result<SymmetricKey> {
        match self.keystore.retrieve(&self.id) {
            Ok(Some(bytes)) => {
                if bytes.len() != KEY_SIZE {
                    tracing::error!(
                        "Keystore entry {}/{} has unexpected length {}",
                        self.id.service,
                        self.id.account,
                        bytes.len()
                    );
                    return Err(Error::KeyUnavailable(
                        "Stored key has an invalid length".to_string(),
                    ));
                }
                tracing::debug!("Retrieved existing encryption key from keystore");
                return SymmetricKey::from_bytes(&bytes);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Keystore retrieval failed: {}", e);
                return Err(Error::KeyUnavailable(e.to_string()));
            }
        }

        tracing::info!("Generating new encryption key (first launch)");
        let key = SymmetricKey::generate();
        self.persist(&key)?;
        tracing::info!("Stored new encryption key in keystore");
        Ok(key)
    }

    fn persist(&self, key: &SymmetricKey) -> Result<()> {
        let caps = self.keystore.capabilities();
        if !caps.has_secure_hardware {
            tracing::info!("Keystore has no secure hardware, key is software-protected");
        }

        if caps.has_biometrics {
            match self.keystore.store(
                &self.id,
                key.as_bytes(),
                AccessPolicy::BiometryOrPasscodeThisDeviceOnly,
            ) {
                Ok(()) => {
                    tracing::debug!("Encryption key protected by biometric or passcode");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Biometric protection not available ({}), using device unlock only",
                        e
                    );
                }
            }
        }

        self.keystore
            .store(
                &self.id,
                key.as_bytes(),
                AccessPolicy::WhenUnlockedThisDeviceOnly,
            )
            .map_err(|e| {
                tracing::error!("Failed to store encryption key in keystore: {}", e);
                Error::KeyUnavailable(e.to_string())
            })
    }

    /// Delete the keystore entry. Succeeds when the entry was removed or
    /// did not exist.
    ///
    /// Anything encrypted under the deleted key becomes unrecoverable.
    pub fn delete_key(&self) -> bool {
        let mut state = self.state.lock();
        match self.keystore.delete(&self.id) {
            Ok(true) => {
                tracing::info!("Encryption key deleted from keystore");
                state.key = None;
                state.source = KeySource::Unresolved;
                true
            }
            Ok(false) => {
                tracing::warn!("No encryption key found to delete");
                state.key = None;
                state.source = KeySource::Unresolved;
                true
            }
            Err(e) => {
                tracing::error!("Failed to delete encryption key: {}", e);
                false
            }
        }
    }
}

impl KeyProvider for KeyManager {
    fn current_key(&self) -> Result<SymmetricKey> {
        // Once degraded, stay on the fallback key for the rest of the process
        {
            let state = self.state.lock();
            if state.source == KeySource::Fallback {
                if let Some(key) = &state.key {
                    return Ok(key.clone());
                }
            }
        }

        match self.get_or_create_key() {
            Ok(key) => Ok(key),
            Err(e) => {
                let fallback = match &self.fallback {
                    Some(fallback) => fallback,
                    None => return Err(e),
                };
                let mut state = self.state.lock();
                if state.source != KeySource::Fallback {
                    tracing::warn!(
                        "Using fallback encryption key; keystore unavailable: {}",
                        e
                    );
                    state.key = Some(fallback.clone());
                    state.source = KeySource::Fallback;
                }
                Ok(fallback.clone())
            }
        }
    }
}
