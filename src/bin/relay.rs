//! Tether relay server
//!
//! An untrusted rendezvous point for device pairing. Clients connect to
//! `/connect/{topic}` and every text frame one client sends is forwarded
//! verbatim to the other clients on the same topic. The relay never parses
//! protocol payloads; it only ever sees public identifiers and ciphertext.
//!
//! Usage:
//!   tether-relay [--port 8787] [--host 0.0.0.0]

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{error, info, warn};

/// Tether relay server
#[derive(Parser)]
#[command(name = "tether-relay")]
#[command(about = "Rendezvous relay for tether device pairing")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8787")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
}

/// A topic two or more parties rendezvous on
struct Topic {
    /// Broadcast channel for the topic
    tx: broadcast::Sender<(u64, String)>,
    /// Number of connected clients
    members: RwLock<usize>,
}

impl Topic {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Topic {
            tx,
            members: RwLock::new(0),
        }
    }
}

/// Server state
struct RelayState {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl RelayState {
    fn new() -> Self {
        RelayState {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Join a topic, creating it on first use
    async fn join(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics.write().await;
        let topic = topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new()))
            .clone();
        *topic.members.write().await += 1;
        topic
    }

    /// Leave a topic, removing it once empty
    async fn leave(&self, name: &str) {
        let mut topics = self.topics.write().await;
        if let Some(topic) = topics.get(name) {
            let mut members = topic.members.write().await;
            *members = members.saturating_sub(1);
            let remaining = *members;
            drop(members);
            if remaining == 0 {
                topics.remove(name);
                info!(topic = name, "topic removed");
            }
        }
    }
}

/// Extract the topic from a `/connect/{topic}` request path
fn topic_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/connect/").filter(|rest| !rest.is_empty())
}

/// Handle a single WebSocket connection
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<RelayState>) {
    let mut topic_name: Option<String> = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match topic_from_path(req.uri().path()) {
            Some(name) => {
                topic_name = Some(name.to_string());
                Ok(resp)
            }
            None => {
                let mut reject =
                    ErrorResponse::new(Some("connect with /connect/{topic}".to_string()));
                *reject.status_mut() = StatusCode::BAD_REQUEST;
                Err(reject)
            }
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            error!(%addr, error = %e, "websocket handshake failed");
            return;
        }
    };
    let Some(topic_name) = topic_name else {
        return;
    };

    let topic = state.join(&topic_name).await;
    let mut rx = topic.tx.subscribe();
    let client_id: u64 = rand::random();
    info!(%addr, topic = %topic_name, "client joined");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            // Frames from this client fan out to the rest of the topic
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = topic.tx.send((client_id, text));
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(%addr, "client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    error!(%addr, error = %e, "websocket error");
                    break;
                }
                _ => {}
            },

            // Frames from the rest of the topic go to this client
            forwarded = rx.recv() => match forwarded {
                Ok((sender_id, text)) => {
                    if sender_id != client_id && write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%addr, skipped, "slow client missed frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    state.leave(&topic_name).await;
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tether_relay=info".parse().expect("static directive")),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
    info!("Tether relay listening on ws://{addr}");
    info!("Clients rendezvous on ws://{addr}/connect/{{topic}}");

    let state = Arc::new(RelayState::new());

    while let Ok((stream, addr)) = listener.accept().await {
        let state = state.clone();
        tokio::spawn(handle_connection(stream, addr, state));
    }
}
