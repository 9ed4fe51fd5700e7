//! P-256 key agreement
//!
//! Each pairing attempt gets a fresh ephemeral NIST P-256 keypair. The
//! public half is rendered as a self-describing identifier (multicodec tag
//! over the compressed curve point, base58btc multibase) and the private
//! half never leaves this module. Shared keys come out of ECDH followed by
//! HKDF-SHA512 under a fixed context string, so the raw agreed point is
//! never used directly and the derived key cannot be confused with one from
//! another protocol.

use hkdf::Hkdf;
use once_cell::sync::OnceCell;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{ecdh, PublicKey as AgreementPublicKey, SecretKey};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::cipher::{Cipher, KEY_SIZE};
use super::error::{CryptoError, CryptoResult};
use super::identity::{decode_multibase_key, DID_KEY_PREFIX};

/// Multicodec indicator for p256-pub (0x1200, varint encoded)
const P256_PUB_MULTICODEC: [u8; 2] = [0x80, 0x24];

/// Size of a SEC1 compressed P-256 point in bytes
const COMPRESSED_POINT_SIZE: usize = 33;

/// Context string binding derived keys to this protocol
const SHARED_KEY_CONTEXT: &[u8] = b"tether/pairing shared key v1";

/// A symmetric key derived from key agreement
///
/// Restricted to encrypt/decrypt use and zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Get the raw bytes (be careful with this!)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

// Debug output never shows key material
impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey(..)")
    }
}

/// An ephemeral keypair for key agreement
///
/// Created fresh per pairing attempt and discarded with the session. The
/// secret scalar is owned exclusively by this value; only the identifier
/// string ever crosses the channel boundary.
pub struct AgreementKey {
    secret: SecretKey,
    did: OnceCell<String>,
}

impl AgreementKey {
    /// Generate a new single-use keypair from platform entropy
    pub fn generate() -> CryptoResult<Self> {
        let mut seed = [0u8; 32];
        // A seed at or above the group order is rejected by from_slice;
        // draw again rather than reduce.
        loop {
            getrandom::getrandom(&mut seed).map_err(|_| CryptoError::CryptoUnavailable)?;
            if let Ok(secret) = SecretKey::from_slice(&seed) {
                seed.zeroize();
                return Ok(AgreementKey {
                    secret,
                    did: OnceCell::new(),
                });
            }
        }
    }

    /// The identifier string for this keypair's public point
    ///
    /// Computed lazily and cached; identical across calls.
    pub fn did(&self) -> &str {
        self.did
            .get_or_init(|| encode_agreement_did(&self.secret.public_key()))
    }

    /// Derive the symmetric key shared with `peer_did`
    ///
    /// Parses the peer identifier, decompresses the curve point, runs ECDH
    /// against our secret scalar, and feeds the agreed secret through
    /// HKDF-SHA512 with the protocol context string.
    pub fn derive_shared_key(&self, peer_did: &str) -> CryptoResult<SharedKey> {
        let peer = parse_agreement_did(peer_did)?;
        let agreed = ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let hk = Hkdf::<Sha512>::new(None, agreed.raw_secret_bytes().as_slice());
        let mut key = [0u8; KEY_SIZE];
        hk.expand(SHARED_KEY_CONTEXT, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        Ok(SharedKey(key))
    }

    /// Encrypt `plaintext` for the holder of `peer_did`
    ///
    /// Re-derives the shared key on every call; derivation is cheap next to
    /// a relay round trip.
    pub fn encrypt_for(&self, peer_did: &str, plaintext: &[u8]) -> CryptoResult<String> {
        let key = self.derive_shared_key(peer_did)?;
        Cipher::encrypt(key.as_bytes(), plaintext)
    }

    /// Decrypt a payload produced by the holder of `peer_did`
    pub fn decrypt_from(&self, peer_did: &str, payload: &str) -> CryptoResult<Vec<u8>> {
        let key = self.derive_shared_key(peer_did)?;
        Cipher::decrypt(key.as_bytes(), payload)
    }
}

/// Render a P-256 public key as an identifier string
fn encode_agreement_did(public: &AgreementPublicKey) -> String {
    let point = public.to_encoded_point(true);
    let mut tagged = Vec::with_capacity(P256_PUB_MULTICODEC.len() + COMPRESSED_POINT_SIZE);
    tagged.extend_from_slice(&P256_PUB_MULTICODEC);
    tagged.extend_from_slice(point.as_bytes());
    format!("{}z{}", DID_KEY_PREFIX, bs58::encode(tagged).into_string())
}

/// Parse an agreement identifier back into a curve point
fn parse_agreement_did(did: &str) -> CryptoResult<AgreementPublicKey> {
    let tagged = decode_multibase_key(did)?;
    let Some(raw) = tagged.strip_prefix(P256_PUB_MULTICODEC.as_slice()) else {
        return Err(CryptoError::UnsupportedAlgorithm);
    };
    if raw.len() != COMPRESSED_POINT_SIZE {
        return Err(CryptoError::InvalidPeerIdentifier);
    }
    AgreementPublicKey::from_sec1_bytes(raw).map_err(|_| CryptoError::InvalidPeerIdentifier)
}
