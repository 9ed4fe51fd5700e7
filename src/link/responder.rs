//! Responder state machine
//!
//! The already-authorized party. It answers a requestor's broadcast with an
//! encrypted authorization challenge naming itself as next contact, stores
//! the signed answer, and verifies it against the PIN the human operator
//! reads off the requestor's screen.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::channel::Channel;
use crate::crypto::{AgreementKey, CryptoResult, Identity, PublicKey, SignatureBytes};
use crate::protocol::grant::{CHALLENGE_OOB_PIN, FACT_CHALLENGE, FACT_NEXT_CONTACT};
use crate::protocol::{Capability, Grant, Message, MessageKind, PinChallengeResponse};

use super::{correlation_id, pin_digest, LinkError, DEFAULT_HANDSHAKE_TIMEOUT};

/// Responder progress through the handshake
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponderState {
    /// Constructed; nothing received yet
    Created,
    /// Waiting for a requestor to announce itself
    AwaitingIntent,
    /// Challenge sent; waiting for the signed answer
    AwaitingResponse,
    /// Answer stored; waiting for the operator to type the PIN
    AwaitingPinConfirmation,
    /// The answer verified against the PIN
    Verified,
    /// The last PIN attempt did not verify
    Rejected,
}

/// Result of checking the stored answer against a PIN
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Signature valid for the typed PIN
    Verified,
    /// Signature invalid for the typed PIN
    Rejected,
}

/// The signed answer held until the operator confirms the PIN
struct PendingChallenge {
    claimant: PublicKey,
    claimant_did: String,
    signature: SignatureBytes,
}

/// The responding side of a pairing
pub struct Responder {
    channel: Channel,
    identity: Identity,
    agreement: AgreementKey,
    wait_timeout: Duration,
    state: ResponderState,
    requested_caps: Vec<Capability>,
    pending: Option<PendingChallenge>,
}

impl Responder {
    /// Build a responder over a channel
    ///
    /// Generates the session's ephemeral keypair. `identity` is this
    /// agent's durable identity; it issues and signs the challenge grant.
    pub fn new(channel: Channel, identity: Identity) -> CryptoResult<Self> {
        Ok(Responder {
            channel,
            identity,
            agreement: AgreementKey::generate()?,
            wait_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            state: ResponderState::Created,
            requested_caps: Vec::new(),
            pending: None,
        })
    }

    /// Override the per-wait handshake timeout
    pub fn with_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// This session's ephemeral identifier
    pub fn did(&self) -> &str {
        self.agreement.did()
    }

    /// Current handshake state
    pub fn state(&self) -> ResponderState {
        self.state
    }

    /// The capabilities the requestor asked for
    pub fn requested_capabilities(&self) -> &[Capability] {
        &self.requested_caps
    }

    /// The long-term identifier of the party whose answer is stored
    pub fn claimant_did(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.claimant_did.as_str())
    }

    /// Run the responder's side up to the PIN confirmation
    ///
    /// Waits for an intent broadcast, issues the encrypted challenge grant
    /// naming this session as next contact, waits for the signed answer
    /// correlated to this exchange, and stores it. After this resolves,
    /// only [`Responder::challenge`] with the operator-typed PIN remains.
    pub async fn bootstrap(&mut self) -> Result<(), LinkError> {
        if self.state != ResponderState::Created {
            return Err(LinkError::Protocol(
                "handshake already ran on this responder".to_string(),
            ));
        }
        self.state = ResponderState::AwaitingIntent;

        let (requestor_did, caps) = self.await_intent().await?;
        self.requested_caps = caps.clone();

        // Issue the challenge: an authorization object whose facts name the
        // expected challenge kind and this session as the next contact. The
        // next-contact identifier is deliberately this session's current
        // ephemeral identifier, not a rotated one.
        let mut facts = BTreeMap::new();
        facts.insert(FACT_CHALLENGE.to_string(), CHALLENGE_OOB_PIN.to_string());
        facts.insert(
            FACT_NEXT_CONTACT.to_string(),
            self.agreement.did().to_string(),
        );
        let grant = Grant::issue(&self.identity, requestor_did.clone(), caps, facts);

        let sealed = self
            .agreement
            .encrypt_for(&requestor_did, &grant.to_bytes())?;
        self.channel
            .send(&Message::res(self.agreement.did(), &requestor_did, sealed))
            .await?;
        self.state = ResponderState::AwaitingResponse;

        let sealed_answer = self.await_response(&requestor_did).await?;
        let plain = self.agreement.decrypt_from(&requestor_did, &sealed_answer)?;
        let response = PinChallengeResponse::from_bytes(&plain)
            .map_err(|e| LinkError::Protocol(format!("challenge answer malformed: {e}")))?;
        let claimant = PublicKey::from_did(&response.did).map_err(|_| {
            LinkError::Protocol("claimant identifier is not a verifier".to_string())
        })?;

        self.pending = Some(PendingChallenge {
            claimant,
            claimant_did: response.did,
            signature: response.sig,
        });
        self.state = ResponderState::AwaitingPinConfirmation;
        Ok(())
    }

    /// Check the stored answer against the PIN the operator typed in
    ///
    /// A rejected outcome is the normal result of a typo or a wrong PIN,
    /// not an error; the stored answer is retained so the operator can try
    /// again. Nothing distinguishes a wrong PIN from a forged signature.
    pub fn challenge(&mut self, pin: &str) -> Result<ChallengeOutcome, LinkError> {
        let pending = self.pending.as_ref().ok_or(LinkError::NoPendingChallenge)?;

        let digest = pin_digest(self.agreement.did(), pin);
        match pending.claimant.verify(&digest, &pending.signature) {
            Ok(()) => {
                self.state = ResponderState::Verified;
                Ok(ChallengeOutcome::Verified)
            }
            Err(_) => {
                self.state = ResponderState::Rejected;
                Ok(ChallengeOutcome::Rejected)
            }
        }
    }

    /// Wait for a requestor's intent broadcast
    async fn await_intent(&self) -> Result<(String, Vec<Capability>), LinkError> {
        let message = timeout(self.wait_timeout, self.channel.wait_for(MessageKind::Init))
            .await
            .map_err(|_| LinkError::Timeout(MessageKind::Init))??;

        match message {
            Message::Init { did, caps, .. } => Ok((did, caps)),
            other => Err(LinkError::Protocol(format!(
                "expected an init message, got {}",
                other.kind()
            ))),
        }
    }

    /// Wait for the signed answer correlated to this exchange
    ///
    /// Answers for other exchanges on the same topic are skipped.
    async fn await_response(&self, requestor_did: &str) -> Result<String, LinkError> {
        let expected = correlation_id(requestor_did, self.agreement.did());
        loop {
            let message = timeout(self.wait_timeout, self.channel.wait_for(MessageKind::Msg))
                .await
                .map_err(|_| LinkError::Timeout(MessageKind::Msg))??;

            let Message::Msg { id, msg, .. } = message else {
                continue;
            };
            if id != expected {
                debug!("ignoring answer correlated to another exchange");
                continue;
            }
            return Ok(msg);
        }
    }
}
