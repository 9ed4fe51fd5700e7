//! BLAKE3 digests
//!
//! Short digests used by the pairing protocol: the PIN-bound challenge
//! digest and message correlation ids.

/// Size of a hash output in bytes
pub const HASH_SIZE: usize = 32;

/// A hash output
pub type HashOutput = [u8; HASH_SIZE];

/// Digest operations
pub struct Hash;

impl Hash {
    /// Compute hash of data
    pub fn hash(data: &[u8]) -> HashOutput {
        blake3::hash(data).into()
    }

    /// Compute hash of the concatenation of two byte strings
    pub fn hash_pair(left: &[u8], right: &[u8]) -> HashOutput {
        let mut hasher = blake3::Hasher::new();
        hasher.update(left);
        hasher.update(right);
        hasher.finalize().into()
    }

    /// Compute hash and return as hex string
    pub fn hash_hex(data: &[u8]) -> String {
        hex::encode(Self::hash(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"pairing digest input";
        let h1 = Hash::hash(data);
        let h2 = Hash::hash(data);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_hash_different_inputs() {
        let h1 = Hash::hash(b"input1");
        let h2 = Hash::hash(b"input2");
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_hash_pair_matches_concatenation() {
        let joined = [b"left".as_slice(), b"right".as_slice()].concat();
        assert_eq!(Hash::hash_pair(b"left", b"right"), Hash::hash(&joined));
    }

    #[test]
    fn test_hash_hex_length() {
        let hex = Hash::hash_hex(b"data");
        assert_eq!(hex.len(), HASH_SIZE * 2);
    }
}
