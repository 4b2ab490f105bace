//! Widget lifecycle adapter.
//!
//! The UI side implements [`Widget`] for each element that displays data
//! and [`StreamSelector`] for the dialog that lets the user pick streams.
//! The router hands the selector a [`Selection`] handle; resolving it
//! feeds the chosen streams back into the discovery flow.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{ConsumerId, RequestSeq};
use crate::protocol::StreamDescriptor;

use super::WeakRouter;

// ============================================================================
// Widget
// ============================================================================

/// A consumer of stream data.
///
/// Callbacks are invoked outside all router locks, so implementations may
/// call back into the router (for example to detach themselves).
pub trait Widget: Send + Sync {
    /// Receives one `data` payload for a subscribed stream.
    fn on_data(&self, payload: &Value);

    /// Called when this widget's discovery request fails.
    ///
    /// Either the server answered with an error ([`Error::Protocol`]) or the
    /// connection went away while waiting ([`Error::ConnectionClosed`]).
    fn on_search_failed(&self, error: &Error) {
        debug!(error = %error, "Search failed");
    }
}

// ============================================================================
// StreamSelector
// ============================================================================

/// Selection surface (dialog) presented after a successful search.
pub trait StreamSelector: Send + Sync {
    /// Shows `streams` to the user on behalf of `consumer_id`.
    ///
    /// Must return promptly. The user's choice is delivered later through
    /// [`Selection::confirm`]; dropping the handle means "no selection".
    fn present(&self, consumer_id: ConsumerId, streams: Vec<StreamDescriptor>, selection: Selection);
}

impl<F> StreamSelector for F
where
    F: Fn(ConsumerId, Vec<StreamDescriptor>, Selection) + Send + Sync,
{
    fn present(&self, consumer_id: ConsumerId, streams: Vec<StreamDescriptor>, selection: Selection) {
        self(consumer_id, streams, selection);
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Pending result of a selection step.
///
/// Resolve exactly once with [`confirm`](Self::confirm) or
/// [`dismiss`](Self::dismiss).
pub struct Selection {
    router: WeakRouter,
    consumer_id: ConsumerId,
    seq: RequestSeq,
    resolved: bool,
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("consumer_id", &self.consumer_id)
            .field("seq", &self.seq)
            .field("resolved", &self.resolved)
            .finish_non_exhaustive()
    }
}

impl Selection {
    pub(crate) fn new(router: WeakRouter, consumer_id: ConsumerId, seq: RequestSeq) -> Self {
        Self {
            router,
            consumer_id,
            seq,
            resolved: false,
        }
    }

    /// Returns the consumer this selection belongs to.
    #[inline]
    #[must_use]
    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Returns the discovery request this selection answers.
    #[inline]
    #[must_use]
    pub fn seq(&self) -> RequestSeq {
        self.seq
    }

    /// Subscribes the consumer to the chosen streams.
    ///
    /// An empty list is valid and subscribes nothing. Returns the number of
    /// new subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConsumer`] if the widget was detached while
    /// the dialog was open.
    pub fn confirm(mut self, chosen: Vec<StreamDescriptor>) -> Result<usize> {
        self.resolved = true;

        match self.router.upgrade() {
            Some(router) => router.apply_selection(self.consumer_id, chosen),
            None => {
                debug!(consumer_id = %self.consumer_id, "Router gone, selection ignored");
                Ok(0)
            }
        }
    }

    /// Resolves with no selection.
    pub fn dismiss(mut self) {
        self.resolved = true;
        debug!(consumer_id = %self.consumer_id, seq = %self.seq, "Selection dismissed");
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        if !self.resolved {
            debug!(consumer_id = %self.consumer_id, seq = %self.seq, "Selection dropped unresolved");
        }
    }
}
