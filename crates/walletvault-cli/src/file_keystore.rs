//! File-backed keystore for hosts without a native one
//!
//! One hex file per (service, account) under a directory. A key is written to
//! a temporary file and linked into place only once complete, so a failed or
//! interrupted write never leaves a truncated key behind. Files are owner-only
//! on Unix. There is no secure hardware and no biometric gate, so only the
//! unlock-only policy applies.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walletvault_storage::keystore::{
    AccessPolicy, KeyIdentifier, KeystoreCapabilities, PlatformKeystore,
};
use walletvault_storage::{Error, Result};
use zeroize::Zeroizing;

/// Keystore over plain files
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    /// Keystore rooted at `dir` (created on first store)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &KeyIdentifier) -> PathBuf {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
                .collect()
        };
        self.dir
            .join(format!("{}.{}.key", sanitize(&id.service), sanitize(&id.account)))
    }
}

impl PlatformKeystore for FileKeystore {
    fn capabilities(&self) -> KeystoreCapabilities {
        KeystoreCapabilities::default()
    }

    fn retrieve(&self, id: &KeyIdentifier) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let path = self.path_for(id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => Zeroizing::new(c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Keystore(format!("Failed to read key file: {}", e))),
        };

        let bytes = hex::decode(contents.trim())
            .map_err(|_| Error::Keystore(format!("Key file {} is corrupt", path.display())))?;
        Ok(Some(Zeroizing::new(bytes)))
    }

    fn store(&self, id: &KeyIdentifier, key: &[u8], policy: AccessPolicy) -> Result<()> {
        if policy != AccessPolicy::WhenUnlockedThisDeviceOnly {
            return Err(Error::Keystore(
                "File keystore cannot enforce biometric access".to_string(),
            ));
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(id);
        let encoded = Zeroizing::new(hex::encode(key));
        write_key_file(&self.dir, &path, encoded.as_bytes())?;
        tracing::debug!("Wrote key file {}", path.display());
        Ok(())
    }

    fn delete(&self, id: &KeyIdentifier) -> Result<bool> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Keystore(format!("Failed to delete key file: {}", e))),
        }
    }
}

/// Write `contents` to a temp file in `dir`, then move it to `path` unless
/// `path` already exists. The temp file is removed on every error path.
fn write_key_file(dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::Keystore(format!("Failed to create key file: {}", e)))?;

    // Restrict before any key bytes are written
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    temp.write_all(contents)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| Error::Keystore(format!("Failed to write key file: {}", e)))?;

    match temp.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(Error::Keystore("Key already exists".to_string()))
        }
        Err(e) => Err(Error::Keystore(format!("Failed to place key file: {}", e.error))),
    }
}

/// Key directory next to the database
pub fn key_dir_for(database_path: &Path) -> PathBuf {
    database_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("keys")
}
