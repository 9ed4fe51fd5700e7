//! Device-linking state machines
//!
//! The two halves of the pairing handshake:
//! - [`Requestor`]: the new device broadcasting its intent and answering
//!   the challenge with a PIN-bound signature
//! - [`Responder`]: the already-authorized agent issuing the challenge and
//!   verifying the answer against the PIN a human operator types in
//!
//! Both sides drive a [`crate::channel::Channel`] opened on the same relay
//! topic. Every wait in the handshake is bounded by a configurable timeout
//! so a stalled peer cannot block a party forever.

pub mod requestor;
pub mod responder;

pub use requestor::{Requestor, RequestorState};
pub use responder::{ChallengeOutcome, Responder, ResponderState};

use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelError;
use crate::crypto::{CryptoError, Hash};
use crate::protocol::MessageKind;

/// Default bound on each wait in the handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Number of decimal digits in a PIN
pub const PIN_LENGTH: usize = 6;

/// Errors surfaced by the pairing state machines
#[derive(Error, Debug)]
pub enum LinkError {
    /// The channel died under the handshake
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// A cryptographic operation failed; the attempt cannot continue
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The peer did not answer within the handshake timeout
    #[error("timed out waiting for a {0} message")]
    Timeout(MessageKind),

    /// A recognized message carried an invalid inner structure
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// `challenge` was called before `bootstrap` stored a response
    #[error("no pending challenge to verify")]
    NoPendingChallenge,
}

/// A short numeric secret relayed out-of-band
///
/// Generated by the requestor, read off its screen by a human and typed
/// into the responder. Its only electronic role is as an input to the
/// signed challenge digest; the digits themselves never cross the relay.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(String);

impl Pin {
    /// Generate a fresh random PIN
    pub fn generate() -> Self {
        let digits = (0..PIN_LENGTH)
            .map(|_| (b'0' + rand::random::<u8>() % 10) as char)
            .collect();
        Pin(digits)
    }

    /// Build a PIN from a digit string
    ///
    /// Returns `None` unless the input is exactly [`PIN_LENGTH`] decimal
    /// digits.
    pub fn from_digits(digits: &str) -> Option<Self> {
        let valid = digits.len() == PIN_LENGTH && digits.chars().all(|c| c.is_ascii_digit());
        valid.then(|| Pin(digits.to_string()))
    }

    /// The digit string, for display to the operator
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Debug output masks the digits so the PIN cannot end up in logs
impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pin(******)")
    }
}

/// The digest a requestor signs and a responder verifies
///
/// Binds the next-contact identifier to the out-of-band PIN.
pub(crate) fn pin_digest(next_contact: &str, pin: &str) -> [u8; 32] {
    Hash::hash_pair(next_contact.as_bytes(), pin.as_bytes())
}

/// Correlation id carried by the final handshake message
pub(crate) fn correlation_id(requestor_did: &str, responder_did: &str) -> String {
    hex::encode(Hash::hash_pair(
        requestor_did.as_bytes(),
        responder_did.as_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::crypto::Identity;
    use crate::protocol::grant::{CHALLENGE_OOB_PIN, FACT_CHALLENGE};
    use crate::protocol::{Ability, Capability};
    use crate::transport::memory::Hub;

    #[test]
    fn test_pin_shape() {
        let pin = Pin::generate();
        assert_eq!(pin.as_str().len(), PIN_LENGTH);
        assert!(pin.as_str().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_pin_from_digits() {
        assert!(Pin::from_digits("482913").is_some());
        assert!(Pin::from_digits("48291").is_none());
        assert!(Pin::from_digits("4829131").is_none());
        assert!(Pin::from_digits("48291a").is_none());
    }

    #[test]
    fn test_pin_debug_masks_digits() {
        let pin = Pin::from_digits("482913").unwrap();
        assert_eq!(format!("{pin:?}"), "Pin(******)");
        assert_eq!(pin.to_string(), "482913");
    }

    #[test]
    fn test_correlation_id_is_ordered() {
        let ab = correlation_id("did:key:zDnA", "did:key:zDnB");
        let ba = correlation_id("did:key:zDnB", "did:key:zDnA");
        assert_ne!(ab, ba);
        assert_eq!(ab, correlation_id("did:key:zDnA", "did:key:zDnB"));
    }

    fn channel_on(hub: &Hub) -> Channel {
        Channel::with_connector(Box::new(hub.connector()))
    }

    /// Yield until both supervisors are attached and the responder's first
    /// wait is registered
    async fn settle(hub: &Hub, members: usize) {
        while hub.member_count() < members {
            tokio::task::yield_now().await;
        }
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_handshake_with_correct_pin() {
        let hub = Hub::new();
        let requestor_channel = channel_on(&hub);
        let responder_channel = channel_on(&hub);

        let responder_identity = Identity::generate();
        let responder_did = responder_identity.did();
        let mut responder = Responder::new(responder_channel, responder_identity).unwrap();

        let requestor_identity = Identity::generate();
        let claimant_did = requestor_identity.did();
        let mut requestor = Requestor::with_pin(
            requestor_channel,
            requestor_identity,
            Pin::from_digits("482913").unwrap(),
        )
        .unwrap();

        let responder_task = tokio::spawn(async move {
            responder.bootstrap().await.unwrap();
            let outcome = responder.challenge("482913").unwrap();
            (outcome, responder)
        });
        settle(&hub, 2).await;

        let caps = vec![Capability::new("account", Ability::LinkDevice)];
        let grant = requestor.broadcast_intent(caps.clone()).await.unwrap();

        assert_eq!(requestor.state(), RequestorState::Done);
        assert_eq!(grant.iss, responder_did);
        assert_eq!(grant.caps, caps);
        assert_eq!(grant.fact(FACT_CHALLENGE), Some(CHALLENGE_OOB_PIN));
        assert!(grant.verify().is_ok());

        let (outcome, responder) = responder_task.await.unwrap();
        assert_eq!(outcome, ChallengeOutcome::Verified);
        assert_eq!(responder.state(), ResponderState::Verified);
        assert_eq!(responder.claimant_did(), Some(claimant_did.as_str()));
        assert_eq!(responder.requested_capabilities(), caps.as_slice());
    }

    #[tokio::test]
    async fn test_handshake_with_wrong_pin() {
        let hub = Hub::new();
        let requestor_channel = channel_on(&hub);
        let responder_channel = channel_on(&hub);

        let mut responder =
            Responder::new(responder_channel, Identity::generate()).unwrap();
        let mut requestor = Requestor::with_pin(
            requestor_channel,
            Identity::generate(),
            Pin::from_digits("482913").unwrap(),
        )
        .unwrap();

        let responder_task = tokio::spawn(async move {
            responder.bootstrap().await.unwrap();
            let first = responder.challenge("000000").unwrap();
            // The operator can retry after a typo
            let second = responder.challenge("482913").unwrap();
            (first, second)
        });
        settle(&hub, 2).await;

        requestor.broadcast_intent(vec![]).await.unwrap();

        let (first, second) = responder_task.await.unwrap();
        assert_eq!(first, ChallengeOutcome::Rejected);
        assert_eq!(second, ChallengeOutcome::Verified);
    }

    #[tokio::test]
    async fn test_challenge_before_bootstrap() {
        let hub = Hub::new();
        let mut responder =
            Responder::new(channel_on(&hub), Identity::generate()).unwrap();

        assert!(matches!(
            responder.challenge("482913"),
            Err(LinkError::NoPendingChallenge)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requestor_times_out_alone() {
        let hub = Hub::new();
        let mut requestor = Requestor::new(channel_on(&hub), Identity::generate())
            .unwrap()
            .with_timeout(Duration::from_millis(250));

        let err = requestor.broadcast_intent(vec![]).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout(MessageKind::Res)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_responder_times_out_alone() {
        let hub = Hub::new();
        let mut responder = Responder::new(channel_on(&hub), Identity::generate())
            .unwrap()
            .with_timeout(Duration::from_millis(250));

        let err = responder.bootstrap().await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout(MessageKind::Init)));
    }
}
