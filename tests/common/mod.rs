//! Local WebSocket stream server for integration tests.

#![allow(dead_code)]

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Installs a test log subscriber once; `RUST_LOG` overrides the filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("streamhub_router=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// TestServer
// ============================================================================

/// Accepts WebSocket clients on an ephemeral port.
pub struct TestServer {
    address: String,
    peers: mpsc::UnboundedReceiver<Peer>,
}

impl TestServer {
    /// Binds to `127.0.0.1:0` and starts accepting.
    pub async fn start() -> anyhow::Result<Self> {
        init_logging();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = format!("ws://{}", listener.local_addr()?);
        let (peer_tx, peers) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                if peer_tx.send(Peer::spawn(ws)).is_err() {
                    break;
                }
            }
        });

        Ok(Self { address, peers })
    }

    /// Returns the `ws://` address of the server.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Waits for the next client.
    pub async fn accept(&mut self) -> anyhow::Result<Peer> {
        timeout(WAIT, self.peers.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("server stopped"))
    }
}

// ============================================================================
// Peer
// ============================================================================

/// Server side of one client connection.
pub struct Peer {
    to_client: mpsc::UnboundedSender<Message>,
    from_client: mpsc::UnboundedReceiver<Value>,
}

impl Peer {
    fn spawn(ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Self {
        let (to_client, mut outgoing) = mpsc::unbounded_channel::<Message>();
        let (incoming, from_client) = mpsc::unbounded_channel::<Value>();
        let (mut write, mut read) = ws.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(value) = serde_json::from_str(text.as_str()) {
                                let _ = incoming.send(value);
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    message = outgoing.recv() => match message {
                        Some(message) => {
                            let closing = matches!(message, Message::Close(_));
                            if write.send(message).await.is_err() || closing {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            to_client,
            from_client,
        }
    }

    /// Sends one JSON frame to the client.
    pub fn send(&self, frame: Value) {
        let _ = self.to_client.send(Message::Text(frame.to_string().into()));
    }

    /// Closes the connection from the server side.
    pub fn close(&self) {
        let _ = self.to_client.send(Message::Close(None));
    }

    /// Waits for the next frame from the client.
    pub async fn recv(&mut self) -> anyhow::Result<Value> {
        timeout(WAIT, self.from_client.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("client disconnected"))
    }

    /// Waits until the client has gone away.
    pub async fn closed(&mut self) -> anyhow::Result<()> {
        timeout(WAIT, async {
            while self.from_client.recv().await.is_some() {}
        })
        .await?;
        Ok(())
    }
}
