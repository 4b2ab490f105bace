//! Builder pattern for session configuration.
//!
//! Provides a fluent API for configuring and creating [`Session`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use streamhub_router::{ConsumerId, Selection, Session, StreamDescriptor};
//!
//! # fn example() -> streamhub_router::Result<()> {
//! let session = Session::builder()
//!     .address("ws://localhost:3300/ws")
//!     .connect_timeout(Duration::from_secs(5))
//!     .selector(|_: ConsumerId, _: Vec<StreamDescriptor>, selection: Selection| {
//!         selection.dismiss();
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SessionConfig, parse_address};
use crate::error::{Error, Result};
use crate::router::StreamSelector;

use super::core::Session;

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for configuring a [`Session`] instance.
///
/// Use [`Session::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct SessionBuilder {
    /// Base configuration; defaults when unset.
    config: Option<SessionConfig>,
    /// Address override.
    address: Option<String>,
    /// Handshake timeout override.
    connect_timeout: Option<Duration>,
    /// Selection surface.
    selector: Option<Arc<dyn StreamSelector>>,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("address", &self.address)
            .field("connect_timeout", &self.connect_timeout)
            .field("selector", &self.selector.is_some())
            .finish()
    }
}

// ============================================================================
// SessionBuilder Implementation
// ============================================================================

impl SessionBuilder {
    /// Creates a new session builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration, e.g. [`SessionConfig::from_env`].
    #[inline]
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the server address (`ws://` or `wss://`).
    ///
    /// Validated by [`build`](Self::build).
    #[inline]
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the selection surface shown after each successful search.
    #[inline]
    #[must_use]
    pub fn selector(mut self, selector: impl StreamSelector + 'static) -> Self {
        self.selector = Some(Arc::new(selector));
        self
    }

    /// Sets a shared selection surface.
    #[inline]
    #[must_use]
    pub fn selector_arc(mut self, selector: Arc<dyn StreamSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Builds the session with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no selector is set
    /// - [`Error::InvalidAddress`] if the address is not a WebSocket URL
    pub fn build(self) -> Result<Session> {
        let selector = self.selector.ok_or_else(|| {
            Error::config(
                "Stream selector is required. Use .selector() to set it.\n\
                 Example: Session::builder().selector(|_, _, selection| selection.dismiss())",
            )
        })?;

        let mut config = self.config.unwrap_or_default();

        if let Some(address) = self.address {
            config.set_address(parse_address(&address)?);
        }

        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(timeout);
        }

        Ok(Session::new(config, selector))
    }
}

// ============================================================================
// Tests
// ============================================================================
