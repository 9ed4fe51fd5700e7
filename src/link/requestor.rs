//! Requestor state machine
//!
//! The initiating party: a new device that wants access. It broadcasts its
//! intent on the shared topic, decrypts the responder's challenge, and
//! answers with a signature binding its long-term identity to the PIN the
//! human operator relays out-of-band.

use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::channel::Channel;
use crate::crypto::{AgreementKey, CryptoResult, Identity};
use crate::protocol::grant::{CHALLENGE_OOB_PIN, FACT_CHALLENGE, FACT_NEXT_CONTACT};
use crate::protocol::{Capability, Grant, Message, MessageKind, PinChallengeResponse};

use super::{correlation_id, pin_digest, LinkError, Pin, DEFAULT_HANDSHAKE_TIMEOUT};

/// Requestor progress through the handshake
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestorState {
    /// Constructed; nothing sent yet
    Created,
    /// Intent broadcast; waiting for the encrypted challenge
    AwaitingChallenge,
    /// Challenge received; the signed answer is being prepared and sent
    AwaitingOutcome,
    /// Handshake finished from this side
    Done,
}

/// The initiating side of a pairing
pub struct Requestor {
    channel: Channel,
    identity: Identity,
    agreement: AgreementKey,
    pin: Pin,
    wait_timeout: Duration,
    state: RequestorState,
}

impl Requestor {
    /// Build a requestor over a channel
    ///
    /// Generates the session's ephemeral keypair and PIN. `identity` is the
    /// caller's durable signing identity; it outlives the protocol and is
    /// only used to sign the challenge digest.
    pub fn new(channel: Channel, identity: Identity) -> CryptoResult<Self> {
        Self::with_pin(channel, identity, Pin::generate())
    }

    /// Build a requestor with a caller-chosen PIN
    pub fn with_pin(channel: Channel, identity: Identity, pin: Pin) -> CryptoResult<Self> {
        Ok(Requestor {
            channel,
            identity,
            agreement: AgreementKey::generate()?,
            pin,
            wait_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            state: RequestorState::Created,
        })
    }

    /// Override the per-wait handshake timeout
    pub fn with_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// The PIN to show the human operator
    pub fn pin(&self) -> &Pin {
        &self.pin
    }

    /// This session's ephemeral identifier
    pub fn did(&self) -> &str {
        self.agreement.did()
    }

    /// Current handshake state
    pub fn state(&self) -> RequestorState {
        self.state
    }

    /// Run the requestor's side of the handshake
    ///
    /// Broadcasts `caps` as the requested access, waits for the encrypted
    /// challenge addressed to this session, answers it with the signed PIN
    /// digest, and returns the authorization object the responder issued.
    /// Suspends across the whole exchange; each wait is bounded by the
    /// handshake timeout.
    pub async fn broadcast_intent(&mut self, caps: Vec<Capability>) -> Result<Grant, LinkError> {
        if self.state != RequestorState::Created {
            return Err(LinkError::Protocol(
                "handshake already ran on this requestor".to_string(),
            ));
        }

        self.channel
            .send(&Message::init(self.agreement.did(), caps))
            .await?;
        self.state = RequestorState::AwaitingChallenge;

        let (responder_did, sealed_challenge) = self.await_challenge().await?;

        let plain = self
            .agreement
            .decrypt_from(&responder_did, &sealed_challenge)?;
        let grant = Grant::from_bytes(&plain)
            .map_err(|e| LinkError::Protocol(format!("challenge payload is not a grant: {e}")))?;
        grant.verify()?;

        if grant.aud != self.agreement.did() {
            return Err(LinkError::Protocol(
                "grant names a different audience".to_string(),
            ));
        }
        match grant.fact(FACT_CHALLENGE) {
            Some(CHALLENGE_OOB_PIN) => {}
            other => {
                return Err(LinkError::Protocol(format!(
                    "unsupported challenge kind: {other:?}"
                )))
            }
        }
        let next_contact = grant
            .fact(FACT_NEXT_CONTACT)
            .ok_or_else(|| {
                LinkError::Protocol("grant is missing the next-contact identifier".to_string())
            })?
            .to_string();
        self.state = RequestorState::AwaitingOutcome;

        // Sign the digest binding the next contact to the out-of-band PIN.
        // The PIN itself stays on this device's screen.
        let digest = pin_digest(&next_contact, self.pin.as_str());
        let response = PinChallengeResponse {
            did: self.identity.did(),
            sig: self.identity.sign(&digest),
        };

        let sealed = self
            .agreement
            .encrypt_for(&next_contact, &response.to_bytes())?;
        let id = correlation_id(self.agreement.did(), &responder_did);
        self.channel.send(&Message::msg(id, sealed)).await?;
        self.state = RequestorState::Done;

        Ok(grant)
    }

    /// Wait for the challenge addressed to this requestor
    ///
    /// A shared topic can carry challenges meant for other requestors;
    /// those are skipped and the wait continues.
    async fn await_challenge(&self) -> Result<(String, String), LinkError> {
        loop {
            let message = timeout(self.wait_timeout, self.channel.wait_for(MessageKind::Res))
                .await
                .map_err(|_| LinkError::Timeout(MessageKind::Res))??;

            let Message::Res { iss, aud, msg, .. } = message else {
                continue;
            };
            if aud != self.agreement.did() {
                debug!("ignoring challenge addressed to another requestor");
                continue;
            }
            return Ok((iss, msg));
        }
    }
}
