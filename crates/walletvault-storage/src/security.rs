//! Symmetric keys and the AES-GCM cipher codec
//!
//! Every sealed value uses the combined layout `[nonce(12)][ciphertext][tag(16)]`,
//! which is what the predecessor apps wrote, so data sealed by earlier
//! versions opens here unchanged. Text storage carries it as standard base64.
//!
//! Opening never reports *why* it failed: bad base64, a truncated buffer, a
//! tag mismatch and a wrong key all come back as `None`.

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes128Gcm, Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

/// AES-GCM nonce length
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag length
pub const TAG_SIZE: usize = 16;

/// Length of an installation key (AES-256)
pub const KEY_SIZE: usize = 32;

/// Compiled-in key used by versions that predate keystore-backed keys.
///
/// Read-only: it decrypts old stored fields and doubles as the degraded-mode
/// key when the keystore cannot hold a fresh one.
pub const LEGACY_STORAGE_KEY: &[u8; 32] = b"WalletVault_Encryption_Key_2024!";

/// Compiled-in AES-128 key the SafeWallet app sealed share codes with.
pub const LEGACY_SHARE_KEY: &[u8; 16] = b"SafeWalletKey123";

/// AES key, 128 or 256 bits. Zeroized on drop.
#[derive(Clone)]
pub enum SymmetricKey {
    /// AES-128-GCM (legacy share codes only)
    Aes128(Zeroizing<[u8; 16]>),
    /// AES-256-GCM
    Aes256(Zeroizing<[u8; 32]>),
}

impl SymmetricKey {
    /// Generate a fresh random 256-bit key
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(key.as_mut_slice());
        SymmetricKey::Aes256(key)
    }

    /// Create from raw key bytes (16 or 32 bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            16 => {
                let mut key = Zeroizing::new([0u8; 16]);
                key.copy_from_slice(bytes);
                Ok(SymmetricKey::Aes128(key))
            }
            32 => {
                let mut key = Zeroizing::new([0u8; 32]);
                key.copy_from_slice(bytes);
                Ok(SymmetricKey::Aes256(key))
            }
            n => Err(Error::Encryption(format!("Invalid key length: {}", n))),
        }
    }

    /// The legacy storage key
    pub fn legacy_storage() -> Self {
        SymmetricKey::Aes256(Zeroizing::new(*LEGACY_STORAGE_KEY))
    }

    /// The legacy share-code key
    pub fn legacy_share() -> Self {
        SymmetricKey::Aes128(Zeroizing::new(*LEGACY_SHARE_KEY))
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SymmetricKey::Aes128(key) => key.as_slice(),
            SymmetricKey::Aes256(key) => key.as_slice(),
        }
    }

    /// Key size in bits
    pub fn bits(&self) -> usize {
        self.as_bytes().len() * 8
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey(AES-{}, <redacted>)", self.bits())
    }
}

/// Seal bytes into `[nonce][ciphertext][tag]` under a fresh random nonce
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = match key {
        SymmetricKey::Aes128(k) => {
            Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(k.as_slice())).encrypt(nonce, plaintext)
        }
        SymmetricKey::Aes256(k) => {
            Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(k.as_slice())).encrypt(nonce, plaintext)
        }
    }
    .map_err(|e| Error::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + sealed.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&sealed);
    Ok(result)
}

/// Open a combined buffer. `None` on any failure.
pub fn open(key: &SymmetricKey, combined: &[u8]) -> Option<Vec<u8>> {
    if combined.len() < NONCE_SIZE + TAG_SIZE {
        return None;
    }

    let nonce = Nonce::from_slice(&combined[..NONCE_SIZE]);
    let ciphertext = &combined[NONCE_SIZE..];

    match key {
        SymmetricKey::Aes128(k) => {
            Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(k.as_slice())).decrypt(nonce, ciphertext)
        }
        SymmetricKey::Aes256(k) => {
            Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(k.as_slice())).decrypt(nonce, ciphertext)
        }
    }
    .ok()
}

/// Try each candidate key in order; returns the index of the key that
/// opened the buffer along with the plaintext.
pub fn open_with_candidates(
    candidates: &[SymmetricKey],
    combined: &[u8],
) -> Option<(usize, Zeroizing<Vec<u8>>)> {
    candidates
        .iter()
        .enumerate()
        .find_map(|(index, key)| open(key, combined).map(|p| (index, Zeroizing::new(p))))
}

/// Encrypt a string and base64-encode the combined buffer
pub fn encrypt_string(plaintext: &str, key: &SymmetricKey) -> Result<String> {
    let combined = seal(key, plaintext.as_bytes())?;
    Ok(STANDARD.encode(combined))
}

/// Decrypt a base64 combined buffer back into a string
pub fn decrypt_string(encoded: &str, key: &SymmetricKey) -> Option<String> {
    let combined = STANDARD.decode(encoded).ok()?;
    let plaintext = open(key, &combined)?;
    String::from_utf8(plaintext).ok()
}
