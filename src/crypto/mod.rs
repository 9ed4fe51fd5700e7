//! Cryptographic primitives for tether
//!
//! This module provides all the cryptographic building blocks:
//! - `identity`: Ed25519 signatures for the long-term agent identity
//! - `agreement`: ephemeral P-256 ECDH + HKDF-SHA512 shared-key derivation
//! - `cipher`: ChaCha20-Poly1305 AEAD encryption of protocol payloads
//! - `hash`: BLAKE3 digests for the PIN challenge and correlation ids

pub mod agreement;
pub mod cipher;
pub mod error;
pub mod hash;
pub mod identity;

// Re-export commonly used types
pub use agreement::{AgreementKey, SharedKey};
pub use cipher::Cipher;
pub use error::{CryptoError, CryptoResult};
pub use hash::Hash;
pub use identity::{Identity, PublicKey, SignatureBytes};

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_full_encryption_flow() {
        // Two parties establish a shared key from their identifiers alone
        let requestor = AgreementKey::generate().unwrap();
        let responder = AgreementKey::generate().unwrap();

        let k1 = requestor.derive_shared_key(responder.did()).unwrap();
        let k2 = responder.derive_shared_key(requestor.did()).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());

        // One encrypts, the other decrypts
        let message = b"authorization challenge";
        let blob = Cipher::encrypt(k1.as_bytes(), message).unwrap();
        let decrypted = Cipher::decrypt(k2.as_bytes(), &blob).unwrap();
        assert_eq!(message, decrypted.as_slice());
    }

    #[test]
    fn test_identity_and_signature_flow() {
        let signer = Identity::generate();

        // Sign a digest of a challenge, verify through the identifier alone
        let digest = Hash::hash_pair(b"did:key:zDnpeer", b"482913");
        let signature = signer.sign(&digest);

        let verifier = PublicKey::from_did(&signer.did()).unwrap();
        assert!(verifier.verify(&digest, &signature).is_ok());

        // A different digest does not verify
        let other = Hash::hash_pair(b"did:key:zDnpeer", b"000000");
        assert!(verifier.verify(&other, &signature).is_err());
    }
}
