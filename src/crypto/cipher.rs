//! ChaCha20-Poly1305 AEAD encryption
//!
//! Encrypts opaque protocol payloads under a key derived by key agreement.
//! The output is a single text-safe blob: base64(nonce || ciphertext || tag),
//! so it can ride inside a JSON message field unchanged.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use super::error::{CryptoError, CryptoResult};

/// Size of the encryption key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric cipher for encryption/decryption
pub struct Cipher;

impl Cipher {
    /// Encrypt data with authentication
    ///
    /// Returns base64 of: nonce || ciphertext || tag
    pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> CryptoResult<String> {
        let cipher = ChaCha20Poly1305::new(key.into());

        // Generate random nonce
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::CryptoUnavailable)?;

        // Prepend nonce to ciphertext
        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a blob produced by [`Cipher::encrypt`]
    ///
    /// Any malformed input fails with the same `DecryptionFailed` error as a
    /// forged authentication tag, so callers cannot be used as an oracle for
    /// which part of the payload was wrong.
    pub fn decrypt(key: &[u8; KEY_SIZE], payload: &str) -> CryptoResult<Vec<u8>> {
        let blob = BASE64
            .decode(payload)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        // Minimum size: nonce + tag
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let cipher = ChaCha20Poly1305::new(key.into());
        let nonce = Nonce::from_slice(&blob[..NONCE_SIZE]);

        cipher
            .decrypt(nonce, &blob[NONCE_SIZE..])
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = [42u8; KEY_SIZE];
        let plaintext = b"challenge payload";

        let blob = Cipher::encrypt(&key, plaintext).unwrap();
        let decrypted = Cipher::decrypt(&key, &blob).unwrap();

        assert_eq!(plaintext, decrypted.as_slice());
    }

    #[test]
    fn test_ciphertext_different_each_time() {
        let key = [42u8; KEY_SIZE];
        let plaintext = b"hello";

        let b1 = Cipher::encrypt(&key, plaintext).unwrap();
        let b2 = Cipher::encrypt(&key, plaintext).unwrap();

        // Different nonces mean different blobs
        assert_ne!(b1, b2);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = [1u8; KEY_SIZE];
        let key2 = [2u8; KEY_SIZE];

        let blob = Cipher::encrypt(&key1, b"secret").unwrap();
        assert_eq!(
            Cipher::decrypt(&key2, &blob),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_SIZE];
        let blob = Cipher::encrypt(&key, b"hello").unwrap();

        // Flip one byte of the decoded blob past the nonce
        let mut raw = BASE64.decode(&blob).unwrap();
        raw[NONCE_SIZE + 1] ^= 0xFF;
        let tampered = BASE64.encode(raw);

        assert_eq!(
            Cipher::decrypt(&key, &tampered),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_truncated_payload_fails() {
        let key = [42u8; KEY_SIZE];
        let short = BASE64.encode([0u8; NONCE_SIZE + TAG_SIZE - 1]);
        assert_eq!(
            Cipher::decrypt(&key, &short),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_garbage_input_fails() {
        let key = [42u8; KEY_SIZE];
        assert_eq!(
            Cipher::decrypt(&key, "not even base64!!"),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_empty_plaintext() {
        let key = [42u8; KEY_SIZE];
        let blob = Cipher::encrypt(&key, b"").unwrap();
        assert_eq!(Cipher::decrypt(&key, &blob).unwrap(), b"");
    }
}
