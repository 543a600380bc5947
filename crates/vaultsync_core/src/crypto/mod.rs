//! Authenticated encryption for record payloads and backups.
//!
//! ## Security Model
//!
//! - AES-256-GCM, so tampering is detected rather than decrypted
//! - a fresh random 96-bit nonce per encryption, stored in front of the
//!   ciphertext: `nonce (12) || ciphertext || tag (16)`
//! - keys are zeroized on drop and never printed
//! - the key is passed explicitly to every operation; whoever owns the
//!   key decides its lifetime, and rotation means handing in a new key
//!
//! ```ignore
//! use vaultsync_core::crypto::{AesGcmCipher, Cipher, EncryptionKey};
//!
//! let key = EncryptionKey::generate();
//! let ciphertext = AesGcmCipher.encrypt(b"profile json", &key)?;
//! let plaintext = AesGcmCipher.decrypt(&ciphertext, &key)?;
//! ```

mod aes;
mod key;

pub use aes::AesGcmCipher;
pub use key::{load_key, load_or_generate_key, EncryptionKey};

use crate::error::CoreResult;

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A symmetric authenticated cipher.
///
/// # Errors
///
/// `decrypt` must fail with [`crate::CoreError::Integrity`] when
/// authentication fails and with [`crate::CoreError::Format`] when the
/// input cannot even hold a nonce and tag.
pub trait Cipher: Send + Sync {
    /// Encrypts `plaintext` under `key` with a fresh nonce.
    fn encrypt(&self, plaintext: &[u8], key: &EncryptionKey) -> CoreResult<Vec<u8>>;

    /// Authenticates and decrypts `ciphertext` under `key`.
    fn decrypt(&self, ciphertext: &[u8], key: &EncryptionKey) -> CoreResult<Vec<u8>>;

    /// Short algorithm name, for diagnostics.
    fn algorithm(&self) -> &'static str;
}
