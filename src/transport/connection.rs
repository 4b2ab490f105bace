//! WebSocket client connection and event loop.
//!
//! This module handles the WebSocket connection to the stream server.
//!
//! # Event Loop
//!
//! Each successful `open` spawns a tokio task that handles:
//!
//! - Incoming frames from the server (handed to the message handler)
//! - Outgoing frames from the router
//! - Shutdown on `close` / `set_address`
//!
//! Every channel is tagged with an epoch. Tearing a channel down bumps the
//! epoch, and frames read by a task whose epoch is no longer current are
//! discarded, so nothing from an old channel reaches the router.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::{DEFAULT_CONNECT_TIMEOUT, parse_address};
use crate::error::{Error, Result};
use crate::protocol::{Envelope, encode};

use super::FrameSink;

// ============================================================================
// Types
// ============================================================================

/// Inbound frame callback.
///
/// Receives the raw frame bytes (text or binary). Must not call
/// [`Connection::on_message`] itself.
pub type MessageHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Called when the server ends the channel.
///
/// Not called for explicit `close` or `set_address`.
pub type DisconnectHandler = Box<dyn Fn() + Send + Sync>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Channel established; frames flow.
    Open,
    /// Tearing the channel down.
    Closing,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Send a text frame.
    Send(String),
    /// Shutdown the channel.
    Shutdown,
}

/// Sender half of a live channel.
struct Channel {
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

/// State shared between handles and the event loop.
struct Shared {
    state: Mutex<ConnectionState>,
    address: Mutex<Option<Url>>,
    channel: Mutex<Option<Channel>>,
    epoch: AtomicU64,
    message_handler: Mutex<Option<Arc<dyn Fn(&[u8]) + Send + Sync>>>,
    disconnect_handler: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

/// Rolls `Connecting` back unless the handshake completed.
///
/// Covers early returns and a dropped `open` future alike.
struct ConnectingGuard<'a> {
    connection: &'a Connection,
    epoch: u64,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.connection.abort_connecting(self.epoch);
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to the stream server.
///
/// One logical channel that may be reopened many times. Cloning yields
/// another handle to the same channel.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`. Apart from `open`/`set_address`, all
/// operations are non-blocking.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    connect_timeout: Duration,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connection {
    /// Creates a disconnected connection.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Disconnected),
                address: Mutex::new(None),
                channel: Mutex::new(None),
                epoch: AtomicU64::new(0),
                message_handler: Mutex::new(None),
                disconnect_handler: Mutex::new(None),
            }),
            connect_timeout,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Returns `true` if frames can be sent.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns the address of the last `open` attempt.
    #[must_use]
    pub fn address(&self) -> Option<Url> {
        self.shared.address.lock().clone()
    }

    /// Sets the inbound frame handler, replacing any previous one.
    pub fn on_message(&self, handler: MessageHandler) {
        *self.shared.message_handler.lock() = Some(Arc::from(handler));
    }

    /// Sets the remote-disconnect handler, replacing any previous one.
    pub fn on_disconnect(&self, handler: DisconnectHandler) {
        *self.shared.disconnect_handler.lock() = Some(Arc::from(handler));
    }

    /// Clears both handlers.
    pub fn clear_handlers(&self) {
        *self.shared.message_handler.lock() = None;
        *self.shared.disconnect_handler.lock() = None;
    }

    /// Opens the channel.
    ///
    /// Does not retry; retry policy belongs to the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if `address` is not a `ws`/`wss` URL
    /// - [`Error::Connection`] if the connection is not `Disconnected`
    /// - [`Error::WebSocket`] if the endpoint is unreachable or refuses
    ///   the upgrade
    /// - [`Error::ConnectionTimeout`] if the handshake takes too long
    /// - [`Error::ConnectionClosed`] if `close` was called meanwhile
    ///
    /// Dropping the returned future mid-handshake puts the connection back
    /// to `Disconnected`.
    pub async fn open(&self, address: &str) -> Result<()> {
        let url = parse_address(address)?;

        let epoch = {
            let mut state = self.shared.state.lock();
            if *state != ConnectionState::Disconnected {
                return Err(Error::connection(format!(
                    "cannot open: connection is {:?}",
                    *state
                )));
            }
            *state = ConnectionState::Connecting;
            *self.shared.address.lock() = Some(url.clone());
            self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        debug!(%url, epoch, "Connecting");

        let guard = ConnectingGuard {
            connection: self,
            epoch,
            armed: true,
        };

        let ws_stream = match timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                warn!(%url, error = %e, "Connection failed");
                return Err(Error::WebSocket(e));
            }
            Err(_) => {
                warn!(%url, "Connection timed out");
                let timeout_ms =
                    u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX);
                return Err(Error::connection_timeout(timeout_ms));
            }
        };

        guard.disarm();

        let (command_tx, command_rx) = mpsc::unbounded_channel();

        {
            let mut state = self.shared.state.lock();
            if self.shared.epoch.load(Ordering::SeqCst) != epoch {
                debug!(%url, epoch, "Connection superseded during handshake");
                return Err(Error::ConnectionClosed);
            }
            *self.shared.channel.lock() = Some(Channel { command_tx });
            *state = ConnectionState::Open;
        }

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&self.shared),
            epoch,
        ));

        info!(%url, "Connection open");
        Ok(())
    }

    /// Changes the server address.
    ///
    /// If the connection is `Open` or `Connecting`, the existing channel
    /// is torn down first; no further frames are delivered from it. The
    /// server forgets subscriptions with the old channel, so the caller
    /// must re-send them after this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::open`]. The address is validated before the
    /// old channel is touched.
    pub async fn set_address(&self, address: &str) -> Result<()> {
        let url = parse_address(address)?;

        if matches!(
            self.state(),
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            info!(from = ?self.address().map(|u| u.to_string()), to = %url, "Address changed, reconnecting");
            self.close();
        }

        self.open(url.as_str()).await
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if *state == ConnectionState::Disconnected {
            return;
        }

        *state = ConnectionState::Closing;
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(channel) = self.shared.channel.lock().take() {
            let _ = channel.command_tx.send(ConnectionCommand::Shutdown);
        }

        *state = ConnectionState::Disconnected;
        debug!("Connection closed");
    }

    /// Enqueues a frame; see [`FrameSink::send`].
    pub fn send(&self, envelope: &Envelope) -> bool {
        let text = match encode(envelope) {
            Ok(text) => text,
            Err(e) => {
                error!(command = %envelope.command, error = %e, "Failed to encode frame");
                return false;
            }
        };

        let channel = self.shared.channel.lock();
        if let Some(channel) = channel.as_ref()
            && channel
                .command_tx
                .send(ConnectionCommand::Send(text))
                .is_ok()
        {
            trace!(command = %envelope.command, "Frame queued");
            return true;
        }

        warn!(command = %envelope.command, "Connection not open, frame dropped");
        false
    }

    /// Resets `Connecting` after a failed or abandoned attempt, unless
    /// superseded.
    fn abort_connecting(&self, epoch: u64) {
        let mut state = self.shared.state.lock();
        if self.shared.epoch.load(Ordering::SeqCst) == epoch
            && *state == ConnectionState::Connecting
        {
            *state = ConnectionState::Disconnected;
        }
    }

    /// Event loop that handles WebSocket I/O for one channel.
    async fn run_event_loop(
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        shared: Arc<Shared>,
        epoch: u64,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming frames from server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::deliver(&shared, epoch, text.as_str().as_bytes());
                        }

                        Some(Ok(Message::Binary(bytes))) => {
                            Self::deliver(&shared, epoch, &bytes);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(epoch, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(epoch, error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!(epoch, "WebSocket stream ended");
                            break;
                        }

                        // Ping/Pong handled by tungstenite
                        _ => {}
                    }
                }

                // Outgoing frames from router
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(epoch, error = %e, "Failed to send frame");
                                break;
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!(epoch, "Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!(epoch, "Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        Self::finish(&shared, epoch);
        debug!(epoch, "Event loop terminated");
    }

    /// Hands one inbound frame to the message handler.
    fn deliver(shared: &Shared, epoch: u64, bytes: &[u8]) {
        if shared.epoch.load(Ordering::SeqCst) != epoch {
            trace!(epoch, "Frame from stale channel dropped");
            return;
        }

        // Called without the handler lock held.
        let handler = shared.message_handler.lock().clone();
        match handler {
            Some(handler) => handler(bytes),
            None => trace!(len = bytes.len(), "No message handler, frame dropped"),
        }
    }

    /// Marks the channel gone if it ended on its own.
    fn finish(shared: &Shared, epoch: u64) {
        let lost = {
            let mut state = shared.state.lock();
            if shared.epoch.load(Ordering::SeqCst) == epoch && *state == ConnectionState::Open {
                *state = ConnectionState::Disconnected;
                shared.channel.lock().take();
                true
            } else {
                false
            }
        };

        if lost {
            warn!(epoch, "Connection lost");
            let handler = shared.disconnect_handler.lock().clone();
            if let Some(handler) = handler {
                handler();
            }
        }
    }
}

impl FrameSink for Connection {
    fn send(&self, envelope: &Envelope) -> bool {
        Connection::send(self, envelope)
    }
}

// ============================================================================
// Tests
// ============================================================================
