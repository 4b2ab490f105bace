//! Data frame fan-out.
//!
//! A [`Delivery`] is assembled under the router lock and run after the lock
//! is released, so widget callbacks never execute while router state is
//! borrowed.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::trace;

use crate::identifiers::{ConsumerId, StreamId};
use crate::registry::Registry;

use super::widget::Widget;

// ============================================================================
// Delivery
// ============================================================================

/// One data payload and the widgets that should receive it.
pub(crate) struct Delivery {
    stream_id: StreamId,
    payload: Value,
    recipients: Vec<Arc<dyn Widget>>,
}

impl Delivery {
    /// Collects the current recipients of `stream_id`.
    ///
    /// Returns `None` when nobody is subscribed.
    pub(crate) fn prepare(
        stream_id: StreamId,
        payload: Value,
        registry: &Registry,
        widgets: &FxHashMap<ConsumerId, Arc<dyn Widget>>,
    ) -> Option<Self> {
        let recipients: Vec<Arc<dyn Widget>> = registry
            .consumers_for(&stream_id)
            .iter()
            .filter_map(|consumer_id| widgets.get(consumer_id).cloned())
            .collect();

        if recipients.is_empty() {
            trace!(%stream_id, "No consumers for data frame");
            return None;
        }

        Some(Self {
            stream_id,
            payload,
            recipients,
        })
    }

    /// Invokes every recipient once. Returns the number invoked.
    pub(crate) fn run(self) -> usize {
        for widget in &self.recipients {
            widget.on_data(&self.payload);
        }

        trace!(stream_id = %self.stream_id, count = self.recipients.len(), "Data delivered");
        self.recipients.len()
    }
}
