//! WebSocket transport layer.
//!
//! This module owns the single duplex channel to the stream server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Router (Rust)  │                              │  Stream server  │
//! │                 │         WebSocket            │                 │
//! │  Connection     │◄────────────────────────────►│  search / data  │
//! │  (event loop)   │      ws://host:port          │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::open` - `Disconnected → Connecting → Open`
//! 2. `Connection::send` - Enqueue frames (fire and forget)
//! 3. `Connection::on_message` - Single consumer of inbound frames
//! 4. `Connection::set_address` - Tear down and reopen elsewhere
//! 5. `Connection::close` - `Closing → Disconnected`, idempotent
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket client connection and event loop |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket client connection and event loop.
pub mod connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionState, DisconnectHandler, MessageHandler};

// ============================================================================
// FrameSink
// ============================================================================

use crate::protocol::Envelope;

/// Outbound half of the transport as seen by the router.
///
/// [`Connection`] is the production implementation; tests substitute a
/// recording sink.
pub trait FrameSink: Send + Sync {
    /// Enqueues a frame for transmission.
    ///
    /// Never blocks and never fails loudly. Returns `false` if the frame
    /// was dropped because the channel is not open.
    fn send(&self, envelope: &Envelope) -> bool;
}
