//! AES-256-GCM implementation of [`Cipher`].

use super::{Cipher, EncryptionKey, NONCE_SIZE, TAG_SIZE};
use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

/// Stateless AES-256-GCM cipher.
///
/// Output layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

impl AesGcmCipher {
    fn cipher_for(key: &EncryptionKey) -> Aes256Gcm {
        Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()))
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8], key: &EncryptionKey) -> CoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = Self::cipher_for(key)
            .encrypt(nonce, plaintext)
            .map_err(|_| CoreError::internal("AES-GCM refused to encrypt"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &EncryptionKey) -> CoreResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::format(format!(
                "ciphertext is {} bytes, need at least {}",
                ciphertext.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }

        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        Self::cipher_for(key)
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CoreError::Integrity)
    }

    fn algorithm(&self) -> &'static str {
        "AES-256-GCM"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn roundtrip_including_empty() {
        let key = EncryptionKey::generate();
        for plaintext in [&b""[..], b"x", b"{\"name\":\"Ada\"}"] {
            let ct = AesGcmCipher.encrypt(plaintext, &key).unwrap();
            assert_eq!(ct.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
            assert_eq!(AesGcmCipher.decrypt(&ct, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn nonces_are_fresh() {
        let key = EncryptionKey::generate();
        let a = AesGcmCipher.encrypt(b"same", &key).unwrap();
        let b = AesGcmCipher.encrypt(b"same", &key).unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_is_integrity_error() {
        let ct = AesGcmCipher
            .encrypt(b"secret", &EncryptionKey::generate())
            .unwrap();
        let err = AesGcmCipher
            .decrypt(&ct, &EncryptionKey::generate())
            .unwrap_err();
        assert!(matches!(err, CoreError::Integrity));
    }

    #[test]
    fn short_input_is_format_error() {
        let key = EncryptionKey::generate();
        let err = AesGcmCipher
            .decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1], &key)
            .unwrap_err();
        assert!(matches!(err, CoreError::Format { .. }));

        // Exactly nonce + tag is well-formed but unauthenticated.
        let err = AesGcmCipher
            .decrypt(&[0u8; NONCE_SIZE + TAG_SIZE], &key)
            .unwrap_err();
        assert!(matches!(err, CoreError::Integrity));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn decrypt_inverts_encrypt(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let key = EncryptionKey::generate();
            let ct = AesGcmCipher.encrypt(&data, &key).unwrap();
            prop_assert_eq!(AesGcmCipher.decrypt(&ct, &key).unwrap(), data);
        }

        #[test]
        fn any_bit_flip_is_detected(
            data in proptest::collection::vec(any::<u8>(), 0..128),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = EncryptionKey::generate();
            let mut ct = AesGcmCipher.encrypt(&data, &key).unwrap();
            let i = position.index(ct.len());
            ct[i] ^= 1 << bit;
            let result = AesGcmCipher.decrypt(&ct, &key);
            prop_assert!(matches!(result, Err(CoreError::Integrity)));
        }
    }
}
