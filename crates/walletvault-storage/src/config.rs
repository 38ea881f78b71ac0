//! Vault configuration
//!
//! JSON file; every field has a default so a partial or missing file is fine.

use crate::error::{Error, Result};
use crate::keystore::{KeyIdentifier, DEFAULT_KEY_ACCOUNT, DEFAULT_KEY_SERVICE};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Database file name inside the data directory
pub const DEFAULT_DATABASE_FILE: &str = "walletvault.db";

/// Vault configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Database location; `None` means `<data dir>/walletvault.db`
    pub database_path: Option<PathBuf>,
    /// Keystore service of the installation key
    pub keychain_service: String,
    /// Keystore account of the installation key
    pub keychain_account: String,
    /// Fall back to the compiled-in key when the keystore is unavailable
    pub allow_fallback_key: bool,
    /// Accept share codes sealed with the SafeWallet key
    pub accept_legacy_share_codes: bool,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            keychain_service: DEFAULT_KEY_SERVICE.to_string(),
            keychain_account: DEFAULT_KEY_ACCOUNT.to_string(),
            allow_fallback_key: true,
            accept_legacy_share_codes: true,
            log_level: "info".to_string(),
        }
    }
}

impl VaultConfig {
    /// Load from `path`; defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Keystore identifier of the installation key
    pub fn key_identifier(&self) -> KeyIdentifier {
        KeyIdentifier::new(&self.keychain_service, &self.keychain_account)
    }

    /// Configured database path, or the default under the data directory
    pub fn resolved_database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => path.clone(),
            None => data_dir().join(DEFAULT_DATABASE_FILE),
        }
    }
}

/// Per-user data directory; the working directory when none can be determined
pub fn data_dir() -> PathBuf {
    ProjectDirs::from("com", "WalletVault", "WalletVault")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("com", "WalletVault", "WalletVault")
        .map(|dirs| dirs.config_dir().join("config.json"))
        .unwrap_or_else(|| PathBuf::from("walletvault.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = VaultConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, VaultConfig::default());
        assert!(config.allow_fallback_key);
        assert_eq!(config.keychain_service, DEFAULT_KEY_SERVICE);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");
        let config = VaultConfig {
            database_path: Some(dir.path().join("cards.db")),
            allow_fallback_key: false,
            log_level: "debug".to_string(),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(VaultConfig::load(&path).unwrap(), config);
        assert_eq!(config.resolved_database_path(), dir.path().join("cards.db"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "accept_legacy_share_codes": false }"#).unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert!(!config.accept_legacy_share_codes);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(VaultConfig::load(&path), Err(Error::Config(_))));
    }
}
