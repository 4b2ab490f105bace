//! Session coordinator.
//!
//! The [`Session`] owns the [`Connection`] and the [`Router`] and keeps
//! them consistent across reconnects:
//!
//! - every successful open replays the active subscriptions
//! - every teardown fails the discovery requests still waiting
//!
//! Connection handlers hold only a weak router handle, so dropping the
//! session releases everything.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::config::{SessionConfig, parse_address};
use crate::error::Result;
use crate::router::{Router, StreamSelector};
use crate::transport::{Connection, ConnectionState};

use super::builder::SessionBuilder;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the session.
pub(crate) struct SessionInner {
    /// Current configuration; the address changes with `set_address`.
    config: Mutex<SessionConfig>,

    /// The single channel to the server.
    connection: Connection,

    /// Router fed by `connection`.
    router: Router,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.connection.clear_handlers();
        self.connection.close();
    }
}

// ============================================================================
// Session
// ============================================================================

/// Client session against one stream server.
///
/// Cloning yields another handle to the same session. The connection is
/// closed when the last handle is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address().as_str())
            .field("state", &self.state())
            .field("router", &self.inner.router)
            .finish()
    }
}

// ============================================================================
// Session - Constructor
// ============================================================================

impl Session {
    /// Creates a configuration builder for the session.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Creates a disconnected session.
    ///
    /// Nothing touches the network until [`open`](Self::open).
    #[must_use]
    pub fn new(config: SessionConfig, selector: Arc<dyn StreamSelector>) -> Self {
        let connection = Connection::new(config.connect_timeout());
        let router = Router::new(Arc::new(connection.clone()), selector);

        let weak = router.downgrade();
        connection.on_message(Box::new(move |bytes| {
            if let Some(router) = weak.upgrade() {
                router.handle_frame(bytes);
            }
        }));

        let weak = router.downgrade();
        connection.on_disconnect(Box::new(move || {
            if let Some(router) = weak.upgrade() {
                router.channel_closed();
            }
        }));

        debug!(address = %config.address(), "Session created");

        Self {
            inner: Arc::new(SessionInner {
                config: Mutex::new(config),
                connection,
                router,
            }),
        }
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Opens the connection to the configured address.
    ///
    /// Subscriptions recorded while disconnected are sent once the channel
    /// is up.
    ///
    /// # Errors
    ///
    /// See [`Connection::open`].
    pub async fn open(&self) -> Result<()> {
        let address = self.address();
        self.inner.connection.open(address.as_str()).await?;

        let replayed = self.inner.router.replay_subscriptions();
        info!(%address, replayed, "Session open");
        Ok(())
    }

    /// Switches to another server.
    ///
    /// The address is validated first; an invalid one leaves the session
    /// untouched. Otherwise the old channel is torn down, waiting searches
    /// fail with [`Error::ConnectionClosed`](crate::Error::ConnectionClosed),
    /// and the session reopens at the new address. Subscriptions survive
    /// and are re-sent to the new server.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`](crate::Error::InvalidAddress) if the
    ///   address is not a `ws`/`wss` URL
    /// - any error of [`open`](Self::open); the new address is kept for the
    ///   next attempt
    pub async fn set_address(&self, address: &str) -> Result<()> {
        let url = parse_address(address)?;

        let previous = {
            let mut config = self.inner.config.lock();
            let previous = config.address().clone();
            config.set_address(url.clone());
            previous
        };

        info!(from = %previous, to = %url, "Session address changed");

        self.inner.connection.close();
        self.inner.router.channel_closed();
        self.open().await
    }

    /// Closes the connection. Idempotent.
    ///
    /// Subscriptions are kept and replayed on the next [`open`](Self::open).
    pub fn close(&self) {
        self.inner.connection.close();
        self.inner.router.channel_closed();
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Returns the router for attaching widgets.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Returns the underlying connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Returns the configured server address.
    #[must_use]
    pub fn address(&self) -> Url {
        self.inner.config.lock().address().clone()
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> SessionConfig {
        self.inner.config.lock().clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
