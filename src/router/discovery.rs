//! Discovery request correlation.
//!
//! `search` responses carry no request ID. The server answers requests in
//! the order it received them, so outstanding requests are kept in a FIFO
//! and each response is matched against the oldest one. A per-consumer
//! sequence number then decides whether the consumer still cares.
//!
//! ```text
//! consumer X: search #1 ─┐
//! consumer X: search #2 ─┼─► in_flight = [(X,#1), (X,#2)]   awaiting[X] = #2
//!                        │
//! response 1 ────────────┴─► (X,#1) != awaiting[X]  → Stale
//! response 2 ──────────────► (X,#2) == awaiting[X]  → Current
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::identifiers::{ConsumerId, RequestSeq};

// ============================================================================
// DiscoveryState
// ============================================================================

/// Discovery state of one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// No request outstanding.
    Idle,
    /// Waiting for the response to this request.
    AwaitingResult(RequestSeq),
}

// ============================================================================
// Resolution
// ============================================================================

/// Outcome of matching one `search` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Response belongs to the consumer's latest request.
    Current {
        /// Requesting consumer.
        consumer_id: ConsumerId,
        /// Matched request.
        seq: RequestSeq,
    },
    /// Response belongs to a superseded or abandoned request.
    Stale {
        /// Requesting consumer.
        consumer_id: ConsumerId,
        /// Superseded request.
        seq: RequestSeq,
    },
    /// No request was outstanding.
    Unsolicited,
}

// ============================================================================
// DiscoveryTracker
// ============================================================================

/// Tracks outstanding `search` requests.
#[derive(Debug, Default)]
pub struct DiscoveryTracker {
    /// Last sequence handed out per consumer; never reset.
    last_issued: FxHashMap<ConsumerId, RequestSeq>,
    /// Request each consumer is still waiting for.
    awaiting: FxHashMap<ConsumerId, RequestSeq>,
    /// Requests on the wire, oldest first.
    in_flight: VecDeque<(ConsumerId, RequestSeq)>,
}

impl DiscoveryTracker {
    /// Creates an empty tracker.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new request, superseding any earlier one from the consumer.
    pub fn begin(&mut self, consumer_id: ConsumerId) -> RequestSeq {
        let seq = self
            .last_issued
            .get(&consumer_id)
            .copied()
            .unwrap_or(RequestSeq::ZERO)
            .next();

        self.last_issued.insert(consumer_id, seq);
        self.awaiting.insert(consumer_id, seq);
        self.in_flight.push_back((consumer_id, seq));
        seq
    }

    /// Takes back a request that never reached the wire.
    ///
    /// The consumer returns to `Idle`.
    pub fn withdraw(&mut self, consumer_id: ConsumerId, seq: RequestSeq) {
        if let Some(pos) = self
            .in_flight
            .iter()
            .rposition(|&entry| entry == (consumer_id, seq))
        {
            self.in_flight.remove(pos);
        }

        if self.awaiting.get(&consumer_id) == Some(&seq) {
            self.awaiting.remove(&consumer_id);
        }
    }

    /// Matches the next `search` response.
    pub fn resolve(&mut self) -> Resolution {
        let Some((consumer_id, seq)) = self.in_flight.pop_front() else {
            return Resolution::Unsolicited;
        };

        if self.awaiting.get(&consumer_id) == Some(&seq) {
            self.awaiting.remove(&consumer_id);
            Resolution::Current { consumer_id, seq }
        } else {
            Resolution::Stale { consumer_id, seq }
        }
    }

    /// Returns the consumer's discovery state.
    #[must_use]
    pub fn state(&self, consumer_id: ConsumerId) -> DiscoveryState {
        match self.awaiting.get(&consumer_id) {
            Some(&seq) => DiscoveryState::AwaitingResult(seq),
            None => DiscoveryState::Idle,
        }
    }

    /// Drops all interest of a detached consumer.
    ///
    /// Its in-flight requests stay queued so later responses still line up;
    /// they resolve as stale.
    pub fn forget(&mut self, consumer_id: ConsumerId) {
        self.awaiting.remove(&consumer_id);
        self.last_issued.remove(&consumer_id);
    }

    /// Abandons every outstanding request (the channel went away).
    ///
    /// Returns the consumers that were waiting. Sequence numbers keep
    /// increasing afterwards.
    pub fn reset(&mut self) -> Vec<ConsumerId> {
        self.in_flight.clear();
        self.awaiting.drain().map(|(consumer_id, _)| consumer_id).collect()
    }

    /// Returns the number of requests on the wire.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
