//! Wire protocol messages
//!
//! Everything that crosses the relay is a JSON text frame carrying a tagged
//! message with a protocol version tag. Three kinds exist:
//! - `init`: the requestor's plaintext broadcast of intent
//! - `res`: the responder's encrypted authorization challenge
//! - `msg`: the requestor's encrypted, signed answer
//!
//! Frames with an unrecognized kind or version tag are ignored by
//! subscribers rather than treated as errors, so a noisy relay cannot abort
//! a handshake in progress.

use serde::{Deserialize, Serialize};

use crate::crypto::SignatureBytes;

pub mod grant;
pub use grant::Grant;

/// Version tag carried by every protocol message
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// The kind of a protocol message, used to key subscriptions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Plaintext intent broadcast
    Init,
    /// Encrypted authorization challenge
    Res,
    /// Encrypted challenge response
    Msg,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Init => "init",
            MessageKind::Res => "res",
            MessageKind::Msg => "msg",
        };
        write!(f, "{name}")
    }
}

/// A message exchanged through the relay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Requestor broadcast announcing itself and the access it wants
    Init {
        /// Protocol version tag
        awv: String,
        /// Sender's ephemeral identifier
        did: String,
        /// Requested capability descriptors
        caps: Vec<Capability>,
    },

    /// Responder challenge addressed to a single requestor
    Res {
        /// Protocol version tag
        awv: String,
        /// Sender's (responder's) ephemeral identifier
        iss: String,
        /// Recipient's (requestor's) ephemeral identifier
        aud: String,
        /// Encrypted authorization payload
        msg: String,
    },

    /// Requestor's signed answer to the challenge
    Msg {
        /// Protocol version tag
        awv: String,
        /// Correlation id binding the two ephemeral identifiers
        id: String,
        /// Encrypted challenge-response payload
        msg: String,
    },
}

impl Message {
    /// Build an `init` message for the current protocol version
    pub fn init(did: impl Into<String>, caps: Vec<Capability>) -> Self {
        Message::Init {
            awv: PROTOCOL_VERSION.to_string(),
            did: did.into(),
            caps,
        }
    }

    /// Build a `res` message for the current protocol version
    pub fn res(iss: impl Into<String>, aud: impl Into<String>, msg: impl Into<String>) -> Self {
        Message::Res {
            awv: PROTOCOL_VERSION.to_string(),
            iss: iss.into(),
            aud: aud.into(),
            msg: msg.into(),
        }
    }

    /// Build a `msg` message for the current protocol version
    pub fn msg(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Message::Msg {
            awv: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            msg: msg.into(),
        }
    }

    /// The kind tag of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Init { .. } => MessageKind::Init,
            Message::Res { .. } => MessageKind::Res,
            Message::Msg { .. } => MessageKind::Msg,
        }
    }

    /// The version tag this message carries
    pub fn version(&self) -> &str {
        match self {
            Message::Init { awv, .. } | Message::Res { awv, .. } | Message::Msg { awv, .. } => awv,
        }
    }
}

/// A capability descriptor: an action on a resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Resource the capability applies to
    pub with: String,
    /// Action permitted on the resource
    pub can: Ability,
}

impl Capability {
    /// Build a capability descriptor
    pub fn new(with: impl Into<String>, can: Ability) -> Self {
        Capability {
            with: with.into(),
            can,
        }
    }
}

/// The abilities this crate understands, plus an opaque fallback
///
/// Unknown ability strings round-trip verbatim through [`Ability::Other`]
/// instead of being rejected, since capability vocabularies grow outside
/// this crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Ability {
    /// Link a new device to the account
    LinkDevice,
    /// Read from a store
    StoreRead,
    /// Write to a store
    StoreWrite,
    /// An ability this crate does not interpret
    Other(String),
}

impl Ability {
    /// The wire string for this ability
    pub fn as_str(&self) -> &str {
        match self {
            Ability::LinkDevice => "link/device",
            Ability::StoreRead => "store/read",
            Ability::StoreWrite => "store/write",
            Ability::Other(s) => s,
        }
    }
}

impl From<String> for Ability {
    fn from(s: String) -> Self {
        match s.as_str() {
            "link/device" => Ability::LinkDevice,
            "store/read" => Ability::StoreRead,
            "store/write" => Ability::StoreWrite,
            _ => Ability::Other(s),
        }
    }
}

impl From<Ability> for String {
    fn from(a: Ability) -> Self {
        match a {
            Ability::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

/// The decrypted payload of a `msg` message
///
/// The signature covers the digest of the next-contact identifier and the
/// out-of-band PIN; the responder recomputes that digest from the PIN the
/// human operator types in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinChallengeResponse {
    /// The claimant's long-term identifier
    pub did: String,
    /// The claimant's long-term-key signature over the PIN digest
    pub sig: SignatureBytes,
}

impl PinChallengeResponse {
    /// Serialize for encryption
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a decrypted payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let msg = Message::init(
            "did:key:zDnexample",
            vec![Capability::new("account", Ability::LinkDevice)],
        );
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();

        assert_eq!(json["type"], "init");
        assert_eq!(json["awv"], PROTOCOL_VERSION);
        assert_eq!(json["did"], "did:key:zDnexample");
        assert_eq!(json["caps"][0]["can"], "link/device");
    }

    #[test]
    fn test_message_round_trip() {
        let messages = vec![
            Message::init("did:key:zDnA", vec![]),
            Message::res("did:key:zDnB", "did:key:zDnA", "blob"),
            Message::msg("abc123", "blob"),
        ];

        for msg in messages {
            let json = serde_json::to_string(&msg).unwrap();
            let restored: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(msg, restored);
        }
    }

    #[test]
    fn test_kind_and_version() {
        let msg = Message::res("a", "b", "c");
        assert_eq!(msg.kind(), MessageKind::Res);
        assert_eq!(msg.version(), PROTOCOL_VERSION);
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let frame = r#"{"awv":"0.1.0","type":"gossip","data":1}"#;
        assert!(serde_json::from_str::<Message>(frame).is_err());
    }

    #[test]
    fn test_unknown_ability_round_trips_verbatim() {
        let cap = Capability::new("mailbox", Ability::Other("mail/send".to_string()));
        let json = serde_json::to_string(&cap).unwrap();
        assert!(json.contains("mail/send"));

        let restored: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.can, Ability::Other("mail/send".to_string()));
        assert_eq!(restored.can.as_str(), "mail/send");
    }

    #[test]
    fn test_known_ability_parses_to_variant() {
        let cap: Capability =
            serde_json::from_str(r#"{"with":"store","can":"store/read"}"#).unwrap();
        assert_eq!(cap.can, Ability::StoreRead);
    }

    #[test]
    fn test_pin_challenge_response_round_trip() {
        let response = PinChallengeResponse {
            did: "did:key:z6MkClaimant".to_string(),
            sig: SignatureBytes([7u8; 64]),
        };

        let restored = PinChallengeResponse::from_bytes(&response.to_bytes()).unwrap();
        assert_eq!(restored.did, response.did);
        assert_eq!(restored.sig, response.sig);
    }
}
