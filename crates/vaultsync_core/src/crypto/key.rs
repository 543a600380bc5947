//! Encryption keys and key files.

use super::KEY_SIZE;
use crate::error::{CoreError, CoreResult};
use rand::RngCore;
use std::fs;
use std::io::Write;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A 256-bit symmetric key.
///
/// Zeroized on drop. `Debug` never prints the bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::invalid_key_size(bytes.len(), KEY_SIZE));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Derives a key from a high-entropy passphrase with HKDF-SHA256.
    ///
    /// HKDF does not slow down guessing; only use it for generated
    /// passphrases held in a secret store, not for human-chosen passwords.
    ///
    /// # Errors
    ///
    /// Returns an error if the passphrase is empty.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> CoreResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        if passphrase.is_empty() {
            return Err(CoreError::validation("passphrase must not be empty"));
        }
        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"vaultsync-record-key-v1", &mut bytes)
            .map_err(|_| CoreError::internal("HKDF expand rejected a 32-byte output"))?;
        Ok(Self { bytes })
    }

    /// Returns the raw key bytes.
    ///
    /// Never log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Loads the key stored at `path`.
///
/// # Errors
///
/// Returns [`CoreError::KeyMissing`] if there is no file at `path`, or an
/// error if it cannot be read or holds something other than exactly 32
/// bytes.
pub fn load_key(path: &Path) -> CoreResult<EncryptionKey> {
    if !path.exists() {
        return Err(CoreError::KeyMissing {
            path: path.display().to_string(),
        });
    }
    let mut bytes = fs::read(path)?;
    let key = EncryptionKey::from_bytes(&bytes);
    bytes.zeroize();
    let key = key?;
    tracing::info!(path = %path.display(), "loaded encryption key");
    Ok(key)
}

/// Loads the key stored at `path`, or generates and persists a new one.
///
/// New key files are created with mode `0600` on unix.
///
/// # Errors
///
/// Returns an error if the file cannot be read or written, or holds
/// something other than exactly 32 bytes.
pub fn load_or_generate_key(path: &Path) -> CoreResult<EncryptionKey> {
    if path.exists() {
        return load_key(path);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let key = EncryptionKey::generate();
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(key.as_bytes())?;
    file.sync_all()?;
    tracing::info!(path = %path.display(), "generated new encryption key");
    Ok(key)
}
