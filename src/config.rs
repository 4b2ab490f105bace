//! Session configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use streamhub_router::SessionConfig;
//!
//! let config = SessionConfig::new("ws://localhost:3300/ws")
//!     .expect("valid address")
//!     .with_connect_timeout(Duration::from_secs(5));
//!
//! assert_eq!(config.address().as_str(), "ws://localhost:3300/ws");
//! ```
//!
//! # Environment
//!
//! | Variable | Default |
//! |----------|---------|
//! | `STREAMHUB_ADDRESS` | `ws://localhost:8765` |
//! | `STREAMHUB_CONNECT_TIMEOUT_SECS` | `30` |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Server address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "ws://localhost:8765";

/// Upper bound for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable holding the server address.
pub const ENV_ADDRESS: &str = "STREAMHUB_ADDRESS";

/// Environment variable holding the connect timeout in seconds.
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "STREAMHUB_CONNECT_TIMEOUT_SECS";

// ============================================================================
// Address Validation
// ============================================================================

/// Parses a server address, accepting only `ws` and `wss` URLs.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] if the address does not parse or uses
/// another scheme.
pub fn parse_address(address: &str) -> Result<Url> {
    let url = Url::parse(address).map_err(|e| Error::invalid_address(address, e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::invalid_address(
            address,
            format!("unsupported scheme '{other}', expected ws or wss"),
        )),
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Connection settings for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    address: Url,
    connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            // Constant is a valid ws URL.
            address: Url::parse(DEFAULT_ADDRESS).unwrap_or_else(|_| unreachable!()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration for the given address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] for non-WebSocket addresses.
    pub fn new(address: &str) -> Result<Self> {
        Ok(Self {
            address: parse_address(address)?,
            ..Self::default()
        })
    }

    /// Loads configuration from the environment, falling back to defaults.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if `STREAMHUB_ADDRESS` is set but invalid
    /// - [`Error::Config`] if the timeout is set but not a number
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(address) = std::env::var(ENV_ADDRESS) {
            config.address = parse_address(&address)?;
        }

        if let Ok(secs) = std::env::var(ENV_CONNECT_TIMEOUT_SECS) {
            let secs: u64 = secs.parse().map_err(|_| {
                Error::config(format!("{ENV_CONNECT_TIMEOUT_SECS} must be seconds, got '{secs}'"))
            })?;
            config.connect_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Returns the server address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Returns the handshake timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Replaces the address after validation.
    pub(crate) fn set_address(&mut self, address: Url) {
        self.address = address;
    }
}

// ============================================================================
// Tests
// ============================================================================
