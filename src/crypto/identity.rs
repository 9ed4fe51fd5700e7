//! Ed25519 identity management
//!
//! Provides the agent's durable cryptographic identity through Ed25519 key
//! pairs. The long-term identity signs the PIN challenge during pairing and
//! is rendered as a self-describing `did:key` identifier. It must never be
//! confused with the per-session agreement key in [`super::agreement`]: the
//! long-term key signs, the ephemeral key agrees.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};

/// Size of a public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a secret key in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of a signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Multicodec indicator for ed25519-pub (0xed, varint encoded)
const ED25519_PUB_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Prefix shared by all identifiers this crate produces
pub(crate) const DID_KEY_PREFIX: &str = "did:key:";

/// A public key for identity verification
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; PUBLIC_KEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(PublicKey(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Render as a self-describing identifier string
    ///
    /// Format: `did:key:` prefix, multibase base58btc (`z`), multicodec
    /// indicator for ed25519-pub, then the 32 public key bytes.
    pub fn did(&self) -> String {
        let mut tagged = Vec::with_capacity(ED25519_PUB_MULTICODEC.len() + PUBLIC_KEY_SIZE);
        tagged.extend_from_slice(&ED25519_PUB_MULTICODEC);
        tagged.extend_from_slice(&self.0);
        format!("{}z{}", DID_KEY_PREFIX, bs58::encode(tagged).into_string())
    }

    /// Parse an identifier produced by [`PublicKey::did`] back into a verifier
    ///
    /// Fails with `UnsupportedAlgorithm` when the identifier is well formed
    /// but carries a non-Ed25519 key.
    pub fn from_did(did: &str) -> CryptoResult<Self> {
        let tagged = decode_multibase_key(did)?;
        let Some(raw) = tagged.strip_prefix(ED25519_PUB_MULTICODEC.as_slice()) else {
            return Err(CryptoError::UnsupportedAlgorithm);
        };
        if raw.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidPeerIdentifier);
        }
        Self::from_bytes(raw).map_err(|_| CryptoError::InvalidPeerIdentifier)
    }

    /// Convert to hex string for display
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    /// Verify a signature against this public key
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> CryptoResult<()> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;

        let sig = Signature::from_bytes(&signature.0);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

/// Strip the `did:key:` prefix and multibase marker, decode base58btc
pub(crate) fn decode_multibase_key(did: &str) -> CryptoResult<Vec<u8>> {
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .and_then(|rest| rest.strip_prefix('z'))
        .ok_or(CryptoError::InvalidPeerIdentifier)?;
    bs58::decode(encoded)
        .into_vec()
        .map_err(|_| CryptoError::InvalidPeerIdentifier)
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A signature produced by an identity
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; SIGNATURE_SIZE]);

// Custom serde impl because arrays >32 don't auto-derive
impl serde::Serialize for SignatureBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for SignatureBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl SignatureBytes {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(SignatureBytes(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::SignatureVerificationFailed)?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

/// A cryptographic identity consisting of a keypair
///
/// The secret key is automatically zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)]
    public_key: PublicKey,
    secret_key: [u8; SECRET_KEY_SIZE],
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        Identity {
            public_key: PublicKey(verifying_key.to_bytes()),
            secret_key: signing_key.to_bytes(),
        }
    }

    /// Create from a seed (deterministic generation)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Identity {
            public_key: PublicKey(verifying_key.to_bytes()),
            secret_key: signing_key.to_bytes(),
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The identifier string for this identity's public key
    pub fn did(&self) -> String {
        self.public_key.did()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let signing_key = SigningKey::from_bytes(&self.secret_key);
        let signature = signing_key.sign(message);
        SignatureBytes(signature.to_bytes())
    }

    /// Verify a signature (convenience method)
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> CryptoResult<()> {
        self.public_key.verify(message, signature)
    }

    /// Export identity to bytes (for secure backup)
    ///
    /// WARNING: This exposes the secret key. Handle with extreme care.
    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE + PUBLIC_KEY_SIZE] {
        let mut bytes = [0u8; SECRET_KEY_SIZE + PUBLIC_KEY_SIZE];
        bytes[..SECRET_KEY_SIZE].copy_from_slice(&self.secret_key);
        bytes[SECRET_KEY_SIZE..].copy_from_slice(&self.public_key.0);
        bytes
    }

    /// Import identity from bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SECRET_KEY_SIZE + PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE + PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut secret_key = [0u8; SECRET_KEY_SIZE];
        secret_key.copy_from_slice(&bytes[..SECRET_KEY_SIZE]);

        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(&bytes[SECRET_KEY_SIZE..]);

        // Verify that the public key matches the secret key
        let signing_key = SigningKey::from_bytes(&secret_key);
        let derived_public = signing_key.verifying_key().to_bytes();

        if derived_public != public_key {
            // Zeroize the secret key before returning error
            let mut sk = secret_key;
            sk.zeroize();
            return Err(CryptoError::InvalidSecretKey);
        }

        Ok(Identity {
            public_key: PublicKey(public_key),
            secret_key,
        })
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Identity {
            public_key: self.public_key,
            secret_key: self.secret_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_generation() {
        let id1 = Identity::generate();
        let id2 = Identity::generate();

        // Each identity should be unique
        assert_ne!(id1.public_key().0, id2.public_key().0);
    }

    #[test]
    fn test_deterministic_generation() {
        let seed = [42u8; 32];
        let id1 = Identity::from_seed(&seed);
        let id2 = Identity::from_seed(&seed);

        assert_eq!(id1.public_key().0, id2.public_key().0);
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let message = b"pin challenge digest";

        let signature = id.sign(message);
        assert!(id.verify(message, &signature).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let id = Identity::generate();

        let signature = id.sign(b"the signed digest");
        assert!(id.verify(b"a different digest", &signature).is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let id1 = Identity::generate();
        let id2 = Identity::generate();
        let message = b"digest";

        let signature = id1.sign(message);
        assert!(id2.verify(message, &signature).is_err());
    }

    #[test]
    fn test_did_round_trip() {
        let id = Identity::generate();
        let did = id.did();

        assert!(did.starts_with("did:key:z6Mk"));

        let restored = PublicKey::from_did(&did).unwrap();
        assert_eq!(restored, *id.public_key());
        // Re-encoding is the identity function
        assert_eq!(restored.did(), did);
    }

    #[test]
    fn test_did_is_stable() {
        let id = Identity::generate();
        assert_eq!(id.did(), id.did());
    }

    #[test]
    fn test_malformed_did_rejected() {
        assert_eq!(
            PublicKey::from_did("did:key:not-base58-0OIl"),
            Err(CryptoError::InvalidPeerIdentifier)
        );
        assert_eq!(
            PublicKey::from_did("did:web:example.com"),
            Err(CryptoError::InvalidPeerIdentifier)
        );
    }

    #[test]
    fn test_export_import() {
        let id = Identity::generate();
        let message = b"test message";
        let signature = id.sign(message);

        let bytes = id.to_bytes();
        let restored = Identity::from_bytes(&bytes).unwrap();

        assert_eq!(id.public_key().0, restored.public_key().0);
        assert!(restored.verify(message, &signature).is_ok());
    }

    #[test]
    fn test_mismatched_import_rejected() {
        let id1 = Identity::generate();
        let id2 = Identity::generate();

        let mut bytes = id1.to_bytes().to_vec();
        bytes[SECRET_KEY_SIZE..].copy_from_slice(&id2.public_key().0);

        assert_eq!(
            Identity::from_bytes(&bytes).unwrap_err(),
            CryptoError::InvalidSecretKey
        );
    }

    #[test]
    fn test_public_key_hex() {
        let id = Identity::generate();
        let hex = id.public_key().to_hex();
        let restored = PublicKey::from_hex(&hex).unwrap();

        assert_eq!(id.public_key().0, restored.0);
    }
}
