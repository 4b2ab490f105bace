//! Subscription registry.
//!
//! In-memory index of which consumers want which streams. It never performs
//! I/O: the router decides when to put `subscribe` / `unsubscribe` on the
//! wire by looking at the subscriber count after each change.
//!
//! # Layout
//!
//! ```text
//! by_stream:   StreamId   → {ConsumerId, ...}
//! by_consumer: ConsumerId → {StreamId, ...}
//! ```
//!
//! Both maps are kept in sync so that consumer teardown is a single pass
//! over that consumer's own streams.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::{FxHashMap, FxHashSet};

use crate::identifiers::{ConsumerId, StreamId};

// ============================================================================
// Registry
// ============================================================================

/// Maps stream IDs to the set of interested consumers.
///
/// Each `(stream, consumer)` pair is stored at most once.
#[derive(Debug, Default)]
pub struct Registry {
    by_stream: FxHashMap<StreamId, FxHashSet<ConsumerId>>,
    by_consumer: FxHashMap<ConsumerId, FxHashSet<StreamId>>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription.
    ///
    /// Returns `true` if the pair was not present before.
    pub fn subscribe(&mut self, stream_id: &StreamId, consumer_id: ConsumerId) -> bool {
        let inserted = self
            .by_stream
            .entry(stream_id.clone())
            .or_default()
            .insert(consumer_id);

        if inserted {
            self.by_consumer
                .entry(consumer_id)
                .or_default()
                .insert(stream_id.clone());
        }

        inserted
    }

    /// Removes a subscription.
    ///
    /// Returns `true` if the pair was present.
    pub fn unsubscribe(&mut self, stream_id: &StreamId, consumer_id: ConsumerId) -> bool {
        let Some(consumers) = self.by_stream.get_mut(stream_id) else {
            return false;
        };

        if !consumers.remove(&consumer_id) {
            return false;
        }

        if consumers.is_empty() {
            self.by_stream.remove(stream_id);
        }

        if let Some(streams) = self.by_consumer.get_mut(&consumer_id) {
            streams.remove(stream_id);
            if streams.is_empty() {
                self.by_consumer.remove(&consumer_id);
            }
        }

        true
    }

    /// Removes every subscription held by a consumer.
    ///
    /// Returns the streams whose subscriber count dropped to zero.
    pub fn unsubscribe_all(&mut self, consumer_id: ConsumerId) -> Vec<StreamId> {
        let Some(streams) = self.by_consumer.remove(&consumer_id) else {
            return Vec::new();
        };

        let mut released = Vec::new();

        for stream_id in streams {
            if let Some(consumers) = self.by_stream.get_mut(&stream_id) {
                consumers.remove(&consumer_id);
                if consumers.is_empty() {
                    self.by_stream.remove(&stream_id);
                    released.push(stream_id);
                }
            }
        }

        released
    }

    /// Returns the consumers subscribed to a stream.
    ///
    /// Unknown streams yield an empty set.
    #[must_use]
    pub fn consumers_for(&self, stream_id: &StreamId) -> FxHashSet<ConsumerId> {
        self.by_stream.get(stream_id).cloned().unwrap_or_default()
    }

    /// Returns the streams a consumer is subscribed to.
    #[must_use]
    pub fn streams_for(&self, consumer_id: ConsumerId) -> FxHashSet<StreamId> {
        self.by_consumer
            .get(&consumer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the number of consumers subscribed to a stream.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self, stream_id: &StreamId) -> usize {
        self.by_stream.get(stream_id).map_or(0, FxHashSet::len)
    }

    /// Returns `true` if the pair is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, stream_id: &StreamId, consumer_id: ConsumerId) -> bool {
        self.by_stream
            .get(stream_id)
            .is_some_and(|c| c.contains(&consumer_id))
    }

    /// Iterates over streams with at least one subscriber.
    pub fn streams(&self) -> impl Iterator<Item = &StreamId> {
        self.by_stream.keys()
    }

    /// Returns the number of `(stream, consumer)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_stream.values().map(FxHashSet::len).sum()
    }

    /// Returns `true` if nothing is subscribed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_stream.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
