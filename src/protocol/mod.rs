//! WebSocket protocol message types.
//!
//! This module defines the frame format exchanged with the stream server.
//!
//! # Protocol Overview
//!
//! | Command | Direction | Payload |
//! |---------|-----------|---------|
//! | `search` | Client → Server | none |
//! | `search` | Server → Client | `{streams: StreamDescriptor[]}` or `error` |
//! | `subscribe` | Client → Server | `{id, name, type}` |
//! | `unsubscribe` | Client → Server | `{id}` |
//! | `data` | Server → Client | stream payload including `id` |
//!
//! Unknown commands decode fine and are ignored by the router.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | JSON encode/decode with strict validation |
//! | `envelope` | Envelope and Command types |
//! | `stream` | Stream catalog types |

// ============================================================================
// Submodules
// ============================================================================

/// JSON frame codec.
pub mod codec;

/// Envelope message type.
pub mod envelope;

/// Stream catalog types.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{DecodeError, decode, encode};
pub use envelope::{Command, Envelope, ErrorPayload};
pub use stream::{DType, FieldSpec, StreamDescriptor};
