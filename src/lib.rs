//! # Tether
//!
//! PIN-authenticated device pairing over an untrusted relay.
//!
//! Two previously unrelated agents establish mutual trust through a
//! three-message handshake: a **requestor** (a new device that wants
//! access) broadcasts its intent, a **responder** (an already-authorized
//! agent) answers with an encrypted authorization challenge, and the
//! requestor proves itself by signing a digest bound to a short PIN that a
//! human relays between the two screens. The relay in the middle sees only
//! public identifiers and ciphertext.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::protocol::{Ability, Capability};
//! use tether::{Channel, Identity, Requestor};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = Channel::open("ws://127.0.0.1:8787", "linking-topic");
//! let mut requestor = Requestor::new(channel, Identity::generate())?;
//!
//! // Show the PIN to the human operator; it never crosses the relay
//! println!("Pairing PIN: {}", requestor.pin());
//!
//! let grant = requestor
//!     .broadcast_intent(vec![Capability::new("account", Ability::LinkDevice)])
//!     .await?;
//! println!("authorized by {}", grant.iss);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              APPLICATION LAYER              │
//! │        CLI  |  relay server  |  apps        │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               LINKING LAYER                 │
//! │     Requestor | Responder | PIN binding     │
//! └─────────────────────┬───────────────────────┘
//! ┌─────────────────────▼───────────────────────┐
//! │               CRYPTO LAYER                  │
//! │ Ed25519 | P-256 ECDH + HKDF | ChaCha20-Poly │
//! └─────────────────────┬───────────────────────┘
//! ┌─────────────────────▼───────────────────────┐
//! │          CHANNEL / TRANSPORT LAYER          │
//! │  reconnecting pub/sub | WebSocket | memory  │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod crypto;
pub mod link;
pub mod protocol;
pub mod transport;

// Re-export main types at crate root
pub use channel::{Channel, ChannelError, ChannelState};
pub use crypto::{AgreementKey, CryptoError, CryptoResult, Identity};
pub use link::{ChallengeOutcome, LinkError, Pin, Requestor, Responder};
pub use protocol::{Ability, Capability, Grant, Message};
