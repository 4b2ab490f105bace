//! Error types for the stream router.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use streamhub_router::{Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     session.set_address("ws://localhost:3300/ws").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidAddress`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`] |
//! | Router | [`Error::UnknownConsumer`] |
//! | External | [`Error::WebSocket`] |
//!
//! Undecodable inbound frames are not errors of this type: the codec reports
//! them as [`DecodeError`](crate::protocol::DecodeError) and the router logs
//! and drops them.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ConsumerId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// No variant is fatal to the process. The worst outcome is a connection
/// that dropped to `Disconnected` and needs a manual reopen.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when session configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Server address is not a usable WebSocket URL.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection cannot be used as requested.
    ///
    /// Returned when `open` is called while a channel is already open or
    /// being established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection is not open, or was closed during the operation.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Server reported an error for a known command.
    #[error("Protocol error on '{command}' (code {code}): {message}")]
    Protocol {
        /// Command the server was answering.
        command: String,
        /// Server-side error code.
        code: i64,
        /// Server-side error message.
        message: String,
    },

    // ========================================================================
    // Router Errors
    // ========================================================================
    /// Consumer is not attached to the router.
    #[error("Unknown consumer: {consumer_id}")]
    UnknownConsumer {
        /// The unattached consumer.
        consumer_id: ConsumerId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// WebSocket handshake or protocol failure.
    ///
    /// Returned by `open` when the endpoint is unreachable or refuses the
    /// upgrade.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid address error.
    #[inline]
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(command: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            command: command.into(),
            code,
            message: message.into(),
        }
    }

    /// Creates an unknown consumer error.
    #[inline]
    pub fn unknown_consumer(consumer_id: ConsumerId) -> Self {
        Self::UnknownConsumer { consumer_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are transient: the user may retry the action
    /// (reopen, search again) without changing configuration.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
                | Self::Protocol { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = Error::protocol("search", 404, "no streams");
        assert_eq!(
            err.to_string(),
            "Protocol error on 'search' (code 404): no streams"
        );
    }

    #[test]
    fn test_is_connection_error() {
        let conn_err = Error::connection("test");
        let timeout_err = Error::ConnectionTimeout { timeout_ms: 1000 };
        let closed_err = Error::ConnectionClosed;
        let other_err = Error::config("test");

        assert!(conn_err.is_connection_error());
        assert!(timeout_err.is_connection_error());
        assert!(closed_err.is_connection_error());
        assert!(!other_err.is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::protocol("search", 1, "busy").is_recoverable());
        assert!(Error::ConnectionClosed.is_recoverable());
        assert!(!Error::config("bad").is_recoverable());
        assert!(!Error::invalid_address("http://x", "scheme").is_recoverable());
    }

    #[test]
    fn test_from_websocket_error() {
        let err: Error = WsError::ConnectionClosed.into();
        assert!(matches!(err, Error::WebSocket(_)));
        assert!(err.is_connection_error());
        assert!(err.is_recoverable());
    }
}
