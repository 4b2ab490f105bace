//! Session: one connection, one router, wired together.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Session`] | Owns the connection and router, handles reconnects |
//! | [`SessionBuilder`] | Fluent configuration builder |
//!
//! # Example
//!
//! ```no_run
//! use streamhub_router::{ConsumerId, Selection, Session, StreamDescriptor};
//!
//! # async fn example() -> streamhub_router::Result<()> {
//! let session = Session::builder()
//!     .address("ws://localhost:8765")
//!     .selector(|_: ConsumerId, streams: Vec<StreamDescriptor>, selection: Selection| {
//!         let _ = selection.confirm(streams);
//!     })
//!     .build()?;
//!
//! session.open().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for session configuration.
pub mod builder;

/// Core session implementation.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::SessionBuilder;
pub use core::Session;
