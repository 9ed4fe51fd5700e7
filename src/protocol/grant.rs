//! Signed authorization objects
//!
//! A [`Grant`] is the portable authorization object carried (encrypted)
//! inside a `res` message. It is issued and signed by the responder's
//! long-term identity and names a recipient, a capability list, and a set
//! of string metadata facts. During pairing the facts tell the requestor
//! which challenge the responder expects and which identifier to contact
//! next; the capability delegation rules themselves live outside this
//! crate, which only needs issue/verify/serialize.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::{CryptoError, CryptoResult, Hash, Identity, PublicKey, SignatureBytes};

use super::Capability;

/// Fact key naming the challenge kind the issuer expects next
pub const FACT_CHALLENGE: &str = "challenge";

/// Fact key naming the identifier the recipient must address next
pub const FACT_NEXT_CONTACT: &str = "next-contact";

/// Challenge kind: a PIN relayed out-of-band by a human operator
pub const CHALLENGE_OOB_PIN: &str = "oob-pin";

/// A portable authorization object
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Grant {
    /// Grant format version
    pub version: u32,
    /// Issuer's long-term identifier
    pub iss: String,
    /// Recipient's ephemeral identifier
    pub aud: String,
    /// Capabilities the issuer asserts for the recipient
    pub caps: Vec<Capability>,
    /// Metadata facts (sorted for canonical serialization)
    pub facts: BTreeMap<String, String>,
    /// When the grant was issued (Unix timestamp)
    pub issued_at: u64,
    /// Issuer's signature over the canonical form
    pub signature: Option<SignatureBytes>,
}

impl Grant {
    /// Current grant format version
    pub const VERSION: u32 = 1;

    /// Issue a signed grant
    pub fn issue(
        issuer: &Identity,
        aud: impl Into<String>,
        caps: Vec<Capability>,
        facts: BTreeMap<String, String>,
    ) -> Self {
        let mut grant = Grant {
            version: Self::VERSION,
            iss: issuer.did(),
            aud: aud.into(),
            caps,
            facts,
            issued_at: current_timestamp(),
            signature: None,
        };
        grant.signature = Some(issuer.sign(&grant.canonical_bytes()));
        grant
    }

    /// Get canonical bytes for signing
    ///
    /// Deterministic byte representation of everything except the signature
    /// itself, regardless of how the grant was serialized in transit.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        // Version (4 bytes, little-endian)
        bytes.extend_from_slice(&self.version.to_le_bytes());

        // Issue timestamp (8 bytes, little-endian)
        bytes.extend_from_slice(&self.issued_at.to_le_bytes());

        // Issuer and audience identifiers, length-prefixed
        for field in [&self.iss, &self.aud] {
            let b = field.as_bytes();
            bytes.extend_from_slice(&(b.len() as u32).to_le_bytes());
            bytes.extend_from_slice(b);
        }

        // Capabilities
        bytes.extend_from_slice(&(self.caps.len() as u32).to_le_bytes());
        for cap in &self.caps {
            let with = cap.with.as_bytes();
            bytes.extend_from_slice(&(with.len() as u32).to_le_bytes());
            bytes.extend_from_slice(with);

            let can = cap.can.as_str().as_bytes();
            bytes.extend_from_slice(&(can.len() as u32).to_le_bytes());
            bytes.extend_from_slice(can);
        }

        // Facts (BTreeMap is already sorted)
        bytes.extend_from_slice(&(self.facts.len() as u32).to_le_bytes());
        for (key, value) in &self.facts {
            let k = key.as_bytes();
            bytes.extend_from_slice(&(k.len() as u32).to_le_bytes());
            bytes.extend_from_slice(k);

            let v = value.as_bytes();
            bytes.extend_from_slice(&(v.len() as u32).to_le_bytes());
            bytes.extend_from_slice(v);
        }

        bytes
    }

    /// Verify the issuer's signature
    pub fn verify(&self) -> CryptoResult<()> {
        let signature = self
            .signature
            .as_ref()
            .ok_or(CryptoError::SignatureVerificationFailed)?;
        let verifier = PublicKey::from_did(&self.iss)?;
        verifier.verify(&self.canonical_bytes(), signature)
    }

    /// Look up a metadata fact
    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    /// Hash of the canonical form (for display/reference)
    pub fn hash(&self) -> String {
        Hash::hash_hex(&self.canonical_bytes())
    }

    /// Serialize for encryption
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a decrypted payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Ability;

    fn pairing_facts(next_contact: &str) -> BTreeMap<String, String> {
        let mut facts = BTreeMap::new();
        facts.insert(FACT_CHALLENGE.to_string(), CHALLENGE_OOB_PIN.to_string());
        facts.insert(FACT_NEXT_CONTACT.to_string(), next_contact.to_string());
        facts
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = Identity::generate();
        let grant = Grant::issue(
            &issuer,
            "did:key:zDnRecipient",
            vec![Capability::new("account", Ability::LinkDevice)],
            pairing_facts("did:key:zDnResponder"),
        );

        assert_eq!(grant.iss, issuer.did());
        assert!(grant.verify().is_ok());
    }

    #[test]
    fn test_facts_are_readable() {
        let issuer = Identity::generate();
        let grant = Grant::issue(
            &issuer,
            "did:key:zDnRecipient",
            vec![],
            pairing_facts("did:key:zDnNext"),
        );

        assert_eq!(grant.fact(FACT_CHALLENGE), Some(CHALLENGE_OOB_PIN));
        assert_eq!(grant.fact(FACT_NEXT_CONTACT), Some("did:key:zDnNext"));
        assert_eq!(grant.fact("absent"), None);
    }

    #[test]
    fn test_tampered_grant_fails() {
        let issuer = Identity::generate();
        let mut grant = Grant::issue(
            &issuer,
            "did:key:zDnRecipient",
            vec![],
            pairing_facts("did:key:zDnNext"),
        );

        // Redirect the next contact after signing
        grant
            .facts
            .insert(FACT_NEXT_CONTACT.to_string(), "did:key:zDnAttacker".to_string());

        assert!(grant.verify().is_err());
    }

    #[test]
    fn test_unsigned_grant_fails() {
        let issuer = Identity::generate();
        let mut grant = Grant::issue(&issuer, "did:key:zDnRecipient", vec![], BTreeMap::new());
        grant.signature = None;

        assert_eq!(
            grant.verify().unwrap_err(),
            CryptoError::SignatureVerificationFailed
        );
    }

    #[test]
    fn test_serialization_round_trip() {
        let issuer = Identity::generate();
        let grant = Grant::issue(
            &issuer,
            "did:key:zDnRecipient",
            vec![Capability::new("store/photos", Ability::StoreRead)],
            pairing_facts("did:key:zDnNext"),
        );

        let restored = Grant::from_bytes(&grant.to_bytes()).unwrap();
        assert!(restored.verify().is_ok());
        assert_eq!(restored.caps, grant.caps);
        assert_eq!(restored.hash(), grant.hash());
    }
}
