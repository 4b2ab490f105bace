//! StreamHub Router - Stream discovery and subscription routing.
//!
//! This library lets many UI widgets share one WebSocket connection to a
//! stream server. Widgets discover the streams the server offers, pick
//! some, and receive the live data of exactly the streams they picked.
//!
//! # Architecture
//!
//! ```text
//!  Widget ─┐                                  ┌──────────────────┐
//!  Widget ─┼─► Router ──► Connection ◄──────► │  Stream server   │
//!  Widget ─┘     │  ▲        (ws)             │ search/subscribe │
//!                │  └──── handle_frame ◄───── │ data             │
//!                ▼                            └──────────────────┘
//!          StreamSelector (dialog)
//! ```
//!
//! Key design principles:
//!
//! - One logical channel per [`Session`], reopened on address change
//! - Wire `subscribe`/`unsubscribe` only on first/last subscriber
//! - Data is delivered only to widgets subscribed to its stream
//! - Widgets are never called while router state is locked
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::Value;
//! use streamhub_router::{ConsumerId, Result, Selection, Session, StreamDescriptor, Widget};
//!
//! struct Plot;
//!
//! impl Widget for Plot {
//!     fn on_data(&self, payload: &Value) {
//!         println!("{payload}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = Session::builder()
//!         .address("ws://localhost:8765")
//!         .selector(|_: ConsumerId, streams: Vec<StreamDescriptor>, selection: Selection| {
//!             let _ = selection.confirm(streams);
//!         })
//!         .build()?;
//!
//!     session.open().await?;
//!
//!     let plot = session.router().attach(Arc::new(Plot));
//!     session.router().initiate_search(plot)?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Session configuration and address validation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire envelope, codec and stream descriptors |
//! | [`registry`] | Stream to consumer subscription index |
//! | [`router`] | Discovery flow, data routing, widget adapter |
//! | [`session`] | Connection and router wired together |
//! | [`transport`] | WebSocket connection |

// ============================================================================
// Modules
// ============================================================================

/// Session configuration.
///
/// Defaults, environment overrides and address validation.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for consumers, streams and requests.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// WebSocket protocol message types.
///
/// Envelope, JSON codec and stream descriptors.
pub mod protocol;

/// Subscription registry.
pub mod registry;

/// Stream discovery and subscription router.
pub mod router;

/// Session coordinator and builder.
pub mod session;

/// WebSocket transport layer.
///
/// Client connection with epoch-tagged teardown.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::SessionConfig;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConsumerId, RequestSeq, StreamId};

// Protocol types
pub use protocol::{
    Command, DType, DecodeError, Envelope, ErrorPayload, FieldSpec, StreamDescriptor,
};

// Registry
pub use registry::Registry;

// Router types
pub use router::{DiscoveryState, Router, Selection, StreamSelector, WeakRouter, Widget};

// Session types
pub use session::{Session, SessionBuilder};

// Transport types
pub use transport::{Connection, ConnectionState, FrameSink};
