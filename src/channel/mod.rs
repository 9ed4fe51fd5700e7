//! Resilient message channel
//!
//! A topic-scoped duplex connection to a relay, shared by both pairing
//! roles. The channel owns a supervisor task that keeps the underlying
//! transport alive across transient disconnects and dispatches inbound
//! frames to type-keyed subscribers.
//!
//! Reconnect policy: on unexpected closure, wait a fixed one second and
//! dial again; a channel gets a budget of ten connection attempts for its
//! whole lifetime (the counter never resets on success). No backoff, no
//! jitter. `send` suspends while the connection is down and fails once the
//! channel is explicitly closed or the budget is spent.
//!
//! Waiting for messages is queue-based: any number of `wait_for` calls can
//! be outstanding per message kind, and each arriving message resolves the
//! oldest waiter, so concurrent waits are never silently dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::protocol::{Message, MessageKind, PROTOCOL_VERSION};
use crate::transport::{Connector, FrameSink, FrameSource, WsConnector};

/// Fixed delay between connection attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Connection-attempt budget for one channel's lifetime
pub const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Channel errors surfaced to callers of blocking operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was explicitly closed
    #[error("channel was explicitly closed")]
    Closed,

    /// The connection-attempt budget is spent
    #[error("gave up after {MAX_CONNECT_ATTEMPTS} connection attempts")]
    ReconnectExhausted,

    /// An outbound message could not be serialized
    #[error("failed to encode outbound message: {0}")]
    Encode(String),
}

/// Connection lifecycle, observable while `send` waits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Establishing or re-establishing the transport
    Connecting,
    /// Transport is open and frames flow
    Open,
    /// Explicitly closed by the caller
    Closed,
    /// Connection-attempt budget spent
    Exhausted,
}

impl ChannelState {
    fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Exhausted)
    }

    fn as_error(self) -> ChannelError {
        match self {
            ChannelState::Exhausted => ChannelError::ReconnectExhausted,
            _ => ChannelError::Closed,
        }
    }
}

/// Identifies a subscription for later removal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type HandlerFn = Arc<dyn Fn(&Message) + Send + Sync>;

struct Handler {
    id: u64,
    once: bool,
    callback: HandlerFn,
}

#[derive(Default)]
struct Dispatch {
    handlers: HashMap<MessageKind, Vec<Handler>>,
    waiters: HashMap<MessageKind, VecDeque<oneshot::Sender<Message>>>,
    /// Set when the supervisor exits; later waits fail immediately
    terminal: Option<ChannelState>,
}

struct Shared {
    state: watch::Sender<ChannelState>,
    dispatch: Mutex<Dispatch>,
    force_closed: AtomicBool,
    next_subscription: AtomicU64,
}

impl Shared {
    /// Move the lifecycle forward; terminal states are sticky
    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn current_error(&self) -> ChannelError {
        self.state.borrow().as_error()
    }

    /// Record the terminal state and wake every pending waiter with it
    fn fail_waiters(&self, terminal: ChannelState) {
        let mut dispatch = self.dispatch.lock().unwrap();
        dispatch.terminal = Some(terminal);
        dispatch.waiters.clear();
    }

    /// Route one inbound frame to subscribers and waiters
    fn dispatch_frame(&self, frame: &str) {
        let value: serde_json::Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(_) => {
                debug!("dropping undecodable frame");
                return;
            }
        };

        // Relay or peer error reports ride in an `error` field; surface
        // them without interrupting delivery of well-formed messages.
        if let Some(error) = value.get("error") {
            warn!(%error, "error report on channel");
        }

        let message: Message = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(_) => {
                debug!("ignoring frame of unrecognized shape");
                return;
            }
        };

        if message.version() != PROTOCOL_VERSION {
            debug!(version = message.version(), "ignoring frame with unrecognized version tag");
            return;
        }

        let kind = message.kind();

        // Snapshot under the lock; callbacks never run while it is held
        let (callbacks, waiter) = {
            let mut dispatch = self.dispatch.lock().unwrap();

            let callbacks: Vec<HandlerFn> = dispatch
                .handlers
                .get(&kind)
                .map(|handlers| handlers.iter().map(|h| Arc::clone(&h.callback)).collect())
                .unwrap_or_default();
            if let Some(handlers) = dispatch.handlers.get_mut(&kind) {
                handlers.retain(|h| !h.once);
            }

            // Oldest live waiter wins this message
            let mut winner = None;
            if let Some(queue) = dispatch.waiters.get_mut(&kind) {
                while let Some(tx) = queue.pop_front() {
                    if !tx.is_closed() {
                        winner = Some(tx);
                        break;
                    }
                }
            }

            (callbacks, winner)
        };

        for callback in callbacks {
            callback(&message);
        }
        if let Some(tx) = waiter {
            let _ = tx.send(message);
        }
    }
}

/// A topic-scoped, reconnecting connection to a relay
pub struct Channel {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
}

impl Channel {
    /// Open a channel to `topic` on the relay at `relay_host`
    ///
    /// The connection is established and maintained by a background task;
    /// `send` and `wait_for` suspend until it is usable. Must be called
    /// from within a tokio runtime.
    pub fn open(relay_host: &str, topic: &str) -> Self {
        Self::with_connector(Box::new(WsConnector::new(relay_host, topic)))
    }

    /// Open a channel over an arbitrary transport
    pub fn with_connector(connector: Box<dyn Connector>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ChannelState::Connecting);

        let shared = Arc::new(Shared {
            state: state_tx,
            dispatch: Mutex::new(Dispatch::default()),
            force_closed: AtomicBool::new(false),
            next_subscription: AtomicU64::new(0),
        });

        tokio::spawn(supervise(Arc::clone(&shared), connector, outbound_rx));

        Channel {
            shared,
            outbound: outbound_tx,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Serialize and transmit a message
    ///
    /// Suspends until the connection reports itself open. Fails with
    /// [`ChannelError::Closed`] if the channel was explicitly closed first,
    /// or [`ChannelError::ReconnectExhausted`] once the attempt budget is
    /// spent.
    pub async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let frame =
            serde_json::to_string(message).map_err(|e| ChannelError::Encode(e.to_string()))?;

        let mut state_rx = self.shared.state.subscribe();
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ChannelState::Open => break,
                ChannelState::Connecting => {}
                terminal => return Err(terminal.as_error()),
            }
            if state_rx.changed().await.is_err() {
                return Err(self.shared.current_error());
            }
        }

        self.outbound
            .send(frame)
            .map_err(|_| self.shared.current_error())
    }

    /// Resolve with the next message of `kind`
    ///
    /// Any number of waits may be outstanding per kind; each arriving
    /// message resolves the oldest one. Pending waits fail with the
    /// channel's terminal error when the channel dies.
    pub async fn wait_for(&self, kind: MessageKind) -> Result<Message, ChannelError> {
        let rx = {
            let mut dispatch = self.shared.dispatch.lock().unwrap();
            if let Some(terminal) = dispatch.terminal {
                return Err(terminal.as_error());
            }
            let (tx, rx) = oneshot::channel();
            dispatch.waiters.entry(kind).or_default().push_back(tx);
            rx
        };

        match rx.await {
            Ok(message) => Ok(message),
            Err(_) => Err(self.shared.current_error()),
        }
    }

    /// Register a handler for every message of `kind`
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.add_handler(kind, handler, false)
    }

    /// Register a handler that auto-unsubscribes after its first delivery
    pub fn subscribe_once<F>(&self, kind: MessageKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.add_handler(kind, handler, true)
    }

    fn add_handler<F>(&self, kind: MessageKind, handler: F, once: bool) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut dispatch = self.shared.dispatch.lock().unwrap();
        dispatch.handlers.entry(kind).or_default().push(Handler {
            id,
            once,
            callback: Arc::new(handler),
        });
        SubscriptionId(id)
    }

    /// Remove a previously registered handler
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut dispatch = self.shared.dispatch.lock().unwrap();
        for handlers in dispatch.handlers.values_mut() {
            handlers.retain(|h| h.id != id.0);
        }
    }

    /// Mark the channel as intentionally closed
    ///
    /// Suppresses every further reconnection attempt and terminates the
    /// transport. Subsequent `send`/`wait_for` calls fail immediately.
    pub fn close(&self) {
        self.shared.force_closed.store(true, Ordering::SeqCst);
        // Directly to Closed so callers fail fast; the supervisor notices
        // the state change and tears the transport down.
        self.shared.set_state(ChannelState::Closed);
    }
}

/// How one driven connection ended
enum DriveEnd {
    /// The transport failed or the remote closed it
    Transport(String),
    /// The channel handle was dropped; nothing can send anymore
    HandleDropped,
    /// `close()` was called
    ForceClosed,
}

/// Owns the connection lifecycle: dial, drive, redial within budget
async fn supervise(
    shared: Arc<Shared>,
    connector: Box<dyn Connector>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let mut attempts: u32 = 0;

    let terminal = loop {
        if shared.force_closed.load(Ordering::SeqCst) {
            break ChannelState::Closed;
        }

        attempts += 1;
        match connector.connect().await {
            Ok((sink, source)) => {
                if shared.force_closed.load(Ordering::SeqCst) {
                    break ChannelState::Closed;
                }
                shared.set_state(ChannelState::Open);

                match drive(sink, source, &shared, &mut outbound).await {
                    DriveEnd::ForceClosed => break ChannelState::Closed,
                    DriveEnd::HandleDropped => break ChannelState::Closed,
                    DriveEnd::Transport(reason) => {
                        warn!(%reason, "relay connection lost");
                        shared.set_state(ChannelState::Connecting);
                    }
                }
            }
            Err(error) => {
                warn!(%error, attempt = attempts, "relay connection attempt failed");
            }
        }

        if attempts >= MAX_CONNECT_ATTEMPTS {
            break ChannelState::Exhausted;
        }

        // Fixed-interval retry; wake early only for close()
        let mut state_rx = shared.state.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = state_rx.changed() => {}
        }
    };

    shared.set_state(terminal);
    shared.fail_waiters(terminal);
}

/// Pump one live connection until it ends
async fn drive(
    mut sink: Box<dyn FrameSink>,
    mut source: Box<dyn FrameSource>,
    shared: &Shared,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> DriveEnd {
    let mut state_rx = shared.state.subscribe();
    if state_rx.borrow().is_terminal() {
        let _ = sink.close().await;
        return DriveEnd::ForceClosed;
    }

    loop {
        tokio::select! {
            inbound = source.next() => match inbound {
                Ok(Some(frame)) => shared.dispatch_frame(&frame),
                Ok(None) => return DriveEnd::Transport("closed by remote".to_string()),
                Err(error) => return DriveEnd::Transport(error.to_string()),
            },
            item = outbound.recv() => match item {
                Some(frame) => {
                    if let Err(error) = sink.send(frame).await {
                        return DriveEnd::Transport(error.to_string());
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return DriveEnd::HandleDropped;
                }
            },
            // Only close() moves the state while a connection is being driven
            _ = state_rx.changed() => {
                let _ = sink.close().await;
                return DriveEnd::ForceClosed;
            }
        }
    }
}
