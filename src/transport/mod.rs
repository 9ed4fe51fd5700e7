//! Transport layer abstraction
//!
//! The message channel is written against a small connector seam so the
//! same reconnect and dispatch machinery runs over:
//! - an in-memory hub (loopback relay for tests)
//! - a WebSocket connection to a real relay server
//!
//! A transport only moves opaque text frames; message framing, versioning
//! and encryption all live above it.

use async_trait::async_trait;
use thiserror::Error;

pub mod websocket;
pub use websocket::WsConnector;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("Connection closed")]
    Disconnected,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Dials the relay; one call per connection attempt
///
/// The channel keeps the connector around so it can redial after an
/// unexpected disconnect.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection, yielding its two directed halves
    async fn connect(&self) -> TransportResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}

/// Outbound half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Transmit one text frame
    async fn send(&mut self, frame: String) -> TransportResult<()>;

    /// Terminate the connection
    async fn close(&mut self) -> TransportResult<()>;
}

/// Inbound half of a connection
#[async_trait]
pub trait FrameSource: Send {
    /// Resolve with the next text frame, or `None` once the connection closed
    async fn next(&mut self) -> TransportResult<Option<String>>;
}

/// In-memory hub transport
///
/// A loopback stand-in for a relay topic: every frame sent by one attached
/// endpoint is delivered to all the others. Endpoints can detach and
/// re-attach, which is what lets the channel's reconnect path be exercised
/// without a network.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// A loopback relay topic
    #[derive(Clone, Default)]
    pub struct Hub {
        inner: Arc<HubInner>,
    }

    #[derive(Default)]
    struct HubInner {
        members: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
        next_id: AtomicU64,
    }

    impl Hub {
        /// Create an empty hub
        pub fn new() -> Self {
            Self::default()
        }

        /// A connector that attaches to this hub
        pub fn connector(&self) -> MemoryConnector {
            MemoryConnector {
                hub: Arc::clone(&self.inner),
            }
        }

        /// Number of currently attached endpoints
        pub fn member_count(&self) -> usize {
            self.inner.members.lock().unwrap().len()
        }
    }

    impl HubInner {
        fn attach(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = mpsc::unbounded_channel();
            self.members.lock().unwrap().insert(id, tx);
            (id, rx)
        }

        fn detach(&self, id: u64) {
            self.members.lock().unwrap().remove(&id);
        }

        fn broadcast(&self, from: u64, frame: &str) {
            let members = self.members.lock().unwrap();
            for (id, tx) in members.iter() {
                if *id != from {
                    let _ = tx.send(frame.to_string());
                }
            }
        }
    }

    /// Connector producing endpoints attached to a [`Hub`]
    pub struct MemoryConnector {
        hub: Arc<HubInner>,
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> TransportResult<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
            let (id, rx) = self.hub.attach();
            let sink = MemorySink {
                hub: Arc::clone(&self.hub),
                id,
                open: true,
            };
            let source = MemorySource { rx };
            Ok((Box::new(sink), Box::new(source)))
        }
    }

    struct MemorySink {
        hub: Arc<HubInner>,
        id: u64,
        open: bool,
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send(&mut self, frame: String) -> TransportResult<()> {
            if !self.open {
                return Err(TransportError::Disconnected);
            }
            self.hub.broadcast(self.id, &frame);
            Ok(())
        }

        async fn close(&mut self) -> TransportResult<()> {
            self.open = false;
            self.hub.detach(self.id);
            Ok(())
        }
    }

    impl Drop for MemorySink {
        fn drop(&mut self) {
            self.hub.detach(self.id);
        }
    }

    struct MemorySource {
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl FrameSource for MemorySource {
        async fn next(&mut self) -> TransportResult<Option<String>> {
            Ok(self.rx.recv().await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::Hub;
    use super::*;

    #[tokio::test]
    async fn test_hub_broadcast() {
        let hub = Hub::new();
        let (mut a_tx, _a_rx) = hub.connector().connect().await.unwrap();
        let (_b_tx, mut b_rx) = hub.connector().connect().await.unwrap();

        a_tx.send("hello".to_string()).await.unwrap();
        assert_eq!(b_rx.next().await.unwrap(), Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_hub_does_not_echo_to_sender() {
        let hub = Hub::new();
        let (mut a_tx, mut a_rx) = hub.connector().connect().await.unwrap();
        let (_b_tx, mut b_rx) = hub.connector().connect().await.unwrap();

        a_tx.send("one".to_string()).await.unwrap();
        a_tx.send("two".to_string()).await.unwrap();

        assert_eq!(b_rx.next().await.unwrap(), Some("one".to_string()));
        assert_eq!(b_rx.next().await.unwrap(), Some("two".to_string()));

        // The sender's own inbox stays empty; closing its sink ends the source
        a_tx.close().await.unwrap();
        assert_eq!(a_rx.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_detaches_member() {
        let hub = Hub::new();
        let (mut a_tx, _a_rx) = hub.connector().connect().await.unwrap();
        assert_eq!(hub.member_count(), 1);

        a_tx.close().await.unwrap();
        assert_eq!(hub.member_count(), 0);
        assert!(a_tx.send("late".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_reattach_after_close() {
        let hub = Hub::new();
        let connector = hub.connector();

        let (mut first, _) = connector.connect().await.unwrap();
        first.close().await.unwrap();

        let (mut second, _) = connector.connect().await.unwrap();
        let (_peer, mut peer_rx) = hub.connector().connect().await.unwrap();
        second.send("back".to_string()).await.unwrap();
        assert_eq!(peer_rx.next().await.unwrap(), Some("back".to_string()));
    }
}
