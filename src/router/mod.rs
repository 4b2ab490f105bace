//! Stream discovery and subscription router.
//!
//! The router sits between the transport and the widgets:
//!
//! ```text
//!   Widget ──attach/initiate_search──►┐
//!                                     │      ┌──────────────┐
//!   Selection::confirm ──────────────►├─────►│  FrameSink   │──► server
//!                                     │      └──────────────┘
//!   server ──► handle_frame ──► search ──► StreamSelector::present
//!                          └──► data   ──► Registry ──► Widget::on_data
//! ```
//!
//! Wire `subscribe` / `unsubscribe` frames are sent only on the first
//! subscriber / last unsubscriber transition of a stream.
//!
//! # Locking
//!
//! All state sits behind one mutex. Frames are handed to the sink while it
//! is held, which keeps wire order identical to registry order; the sink
//! must therefore never call back into the router. Widgets and the selector
//! are always invoked after the lock is released.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `discovery` | `search` request correlation |
//! | `dispatch` | Data fan-out |
//! | `widget` | Widget, StreamSelector and Selection |

// ============================================================================
// Submodules
// ============================================================================

/// Discovery request correlation.
pub mod discovery;

/// Data frame fan-out.
mod dispatch;

/// Widget lifecycle adapter.
pub mod widget;

// ============================================================================
// Re-exports
// ============================================================================

pub use discovery::{DiscoveryState, DiscoveryTracker, Resolution};
pub use widget::{Selection, StreamSelector, Widget};

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConsumerId, RequestSeq, StreamId};
use crate::protocol::{Command, Envelope, StreamDescriptor, decode};
use crate::registry::Registry;
use crate::transport::FrameSink;

use dispatch::Delivery;

// ============================================================================
// RouterState
// ============================================================================

/// A stream with at least one subscriber.
struct ActiveStream {
    descriptor: StreamDescriptor,
    /// `subscribe` reached the current channel.
    announced: bool,
}

/// Everything the router mutates, guarded by one lock.
#[derive(Default)]
struct RouterState {
    registry: Registry,
    discovery: DiscoveryTracker,
    widgets: FxHashMap<ConsumerId, Arc<dyn Widget>>,
    active: FxHashMap<StreamId, ActiveStream>,
}

impl RouterState {
    fn ensure_attached(&self, consumer_id: ConsumerId) -> Result<()> {
        if self.widgets.contains_key(&consumer_id) {
            Ok(())
        } else {
            Err(Error::unknown_consumer(consumer_id))
        }
    }

    /// Adds one subscription; sends `subscribe` on the first subscriber.
    ///
    /// Returns `true` if the pair is new.
    fn subscribe(
        &mut self,
        sink: &dyn FrameSink,
        consumer_id: ConsumerId,
        stream: StreamDescriptor,
    ) -> bool {
        if !self.registry.subscribe(&stream.id, consumer_id) {
            trace!(%consumer_id, stream_id = %stream.id, "Already subscribed");
            return false;
        }

        if self.registry.subscriber_count(&stream.id) == 1 {
            let announced = sink.send(&Envelope::subscribe(&stream));
            debug!(stream_id = %stream.id, announced, "First subscriber");
            self.active.insert(
                stream.id.clone(),
                ActiveStream {
                    descriptor: stream,
                    announced,
                },
            );
        }

        true
    }

    /// Sends `unsubscribe` for a stream nobody holds any more.
    fn release(&mut self, sink: &dyn FrameSink, stream_id: &StreamId) {
        self.active.remove(stream_id);
        let sent = sink.send(&Envelope::unsubscribe(stream_id));
        debug!(%stream_id, sent, "Last subscriber gone");
    }
}

// ============================================================================
// Router
// ============================================================================

struct RouterInner {
    sink: Arc<dyn FrameSink>,
    selector: Arc<dyn StreamSelector>,
    state: Mutex<RouterState>,
}

/// Routes discovery results and live data to widgets.
///
/// Cloning yields another handle to the same router.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

/// Non-owning router handle.
#[derive(Clone)]
pub struct WeakRouter(Weak<RouterInner>);

impl WeakRouter {
    /// Returns the router if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Router> {
        self.0.upgrade().map(|inner| Router { inner })
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Router")
            .field("widgets", &state.widgets.len())
            .field("subscriptions", &state.registry.len())
            .field("in_flight", &state.discovery.in_flight())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Router - Constructor
// ============================================================================

impl Router {
    /// Creates a router sending through `sink` and presenting catalogs
    /// through `selector`.
    #[must_use]
    pub fn new(sink: Arc<dyn FrameSink>, selector: Arc<dyn StreamSelector>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                sink,
                selector,
                state: Mutex::new(RouterState::default()),
            }),
        }
    }

    /// Returns a weak handle.
    #[inline]
    #[must_use]
    pub fn downgrade(&self) -> WeakRouter {
        WeakRouter(Arc::downgrade(&self.inner))
    }
}

// ============================================================================
// Router - Widget Lifecycle
// ============================================================================

impl Router {
    /// Attaches a widget and assigns it a fresh consumer ID.
    pub fn attach(&self, widget: Arc<dyn Widget>) -> ConsumerId {
        let consumer_id = ConsumerId::generate();
        self.inner.state.lock().widgets.insert(consumer_id, widget);
        debug!(%consumer_id, "Widget attached");
        consumer_id
    }

    /// Detaches a widget and drops all of its subscriptions.
    ///
    /// Sends one `unsubscribe` for each stream that no other widget holds.
    /// Returns `false` if the widget was not attached.
    pub fn detach(&self, consumer_id: ConsumerId) -> bool {
        let widget = {
            let mut state = self.inner.state.lock();
            let widget = state.widgets.remove(&consumer_id);
            state.discovery.forget(consumer_id);

            for stream_id in state.registry.unsubscribe_all(consumer_id) {
                state.release(self.inner.sink.as_ref(), &stream_id);
            }

            widget
        };

        debug!(%consumer_id, attached = widget.is_some(), "Widget detached");
        widget.is_some()
    }

    /// Returns `true` if the consumer is attached.
    #[must_use]
    pub fn is_attached(&self, consumer_id: ConsumerId) -> bool {
        self.inner.state.lock().widgets.contains_key(&consumer_id)
    }
}

// ============================================================================
// Router - Discovery
// ============================================================================

impl Router {
    /// Sends `search` on behalf of a consumer.
    ///
    /// Supersedes any request the consumer still has outstanding.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownConsumer`] if the consumer is not attached
    /// - [`Error::ConnectionClosed`] if the frame could not be sent; the
    ///   consumer stays `Idle`
    pub fn initiate_search(&self, consumer_id: ConsumerId) -> Result<RequestSeq> {
        let mut state = self.inner.state.lock();
        state.ensure_attached(consumer_id)?;

        let seq = state.discovery.begin(consumer_id);

        if !self.inner.sink.send(&Envelope::search()) {
            state.discovery.withdraw(consumer_id, seq);
            return Err(Error::ConnectionClosed);
        }

        debug!(%consumer_id, %seq, "Search issued");
        Ok(seq)
    }

    /// Returns the consumer's discovery state.
    #[must_use]
    pub fn discovery_state(&self, consumer_id: ConsumerId) -> DiscoveryState {
        self.inner.state.lock().discovery.state(consumer_id)
    }

    /// Subscribes a consumer to each chosen stream.
    ///
    /// Returns the number of new subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConsumer`] if the consumer is not attached.
    pub fn apply_selection(
        &self,
        consumer_id: ConsumerId,
        chosen: Vec<StreamDescriptor>,
    ) -> Result<usize> {
        let mut state = self.inner.state.lock();
        state.ensure_attached(consumer_id)?;

        let mut added = 0;
        for stream in chosen {
            if state.subscribe(self.inner.sink.as_ref(), consumer_id, stream) {
                added += 1;
            }
        }

        debug!(%consumer_id, added, "Selection applied");
        Ok(added)
    }

    /// Subscribes a consumer to one stream.
    ///
    /// Returns `true` if the subscription is new.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConsumer`] if the consumer is not attached.
    pub fn subscribe(&self, consumer_id: ConsumerId, stream: &StreamDescriptor) -> Result<bool> {
        let mut state = self.inner.state.lock();
        state.ensure_attached(consumer_id)?;
        Ok(state.subscribe(self.inner.sink.as_ref(), consumer_id, stream.clone()))
    }

    /// Unsubscribes a consumer from one stream.
    ///
    /// Sends `unsubscribe` if this was the last subscriber. Returns `true`
    /// if the subscription existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConsumer`] if the consumer is not attached.
    pub fn unsubscribe(&self, consumer_id: ConsumerId, stream_id: &StreamId) -> Result<bool> {
        let mut state = self.inner.state.lock();
        state.ensure_attached(consumer_id)?;

        if !state.registry.unsubscribe(stream_id, consumer_id) {
            return Ok(false);
        }

        if state.registry.subscriber_count(stream_id) == 0 {
            state.release(self.inner.sink.as_ref(), stream_id);
        }

        Ok(true)
    }
}

// ============================================================================
// Router - Inbound
// ============================================================================

impl Router {
    /// Decodes and routes one raw inbound frame.
    ///
    /// Undecodable frames are logged and dropped.
    pub fn handle_frame(&self, bytes: &[u8]) {
        match decode(bytes) {
            Ok(envelope) => self.handle_envelope(envelope),
            Err(e) => warn!(error = %e, len = bytes.len(), "Dropping undecodable frame"),
        }
    }

    /// Routes one decoded envelope.
    pub fn handle_envelope(&self, envelope: Envelope) {
        match envelope.kind() {
            Command::Search => self.handle_search(envelope),
            Command::Data => self.handle_data(envelope),
            Command::Subscribe | Command::Unsubscribe => match envelope.error {
                Some(ref error) => warn!(
                    command = %envelope.command,
                    stream_id = ?envelope.stream_id(),
                    code = error.code,
                    message = %error.message,
                    "Server rejected request"
                ),
                None => trace!(command = %envelope.command, "Acknowledged"),
            },
            Command::Other(name) => debug!(command = %name, "Ignoring unknown command"),
        }
    }

    fn handle_search(&self, envelope: Envelope) {
        let (resolution, widget) = {
            let mut state = self.inner.state.lock();
            let resolution = state.discovery.resolve();
            let widget = match resolution {
                Resolution::Current { consumer_id, .. } => state.widgets.get(&consumer_id).cloned(),
                _ => None,
            };
            (resolution, widget)
        };

        let (consumer_id, seq) = match resolution {
            Resolution::Current { consumer_id, seq } => (consumer_id, seq),
            Resolution::Stale { consumer_id, seq } => {
                debug!(%consumer_id, %seq, "Discarding stale search response");
                return;
            }
            Resolution::Unsolicited => {
                debug!("Discarding unsolicited search response");
                return;
            }
        };

        let Some(widget) = widget else {
            return;
        };

        if let Some(error) = envelope.error {
            let error = Error::protocol(Command::SEARCH, error.code, error.message);
            warn!(%consumer_id, %seq, error = %error, "Search failed");
            widget.on_search_failed(&error);
            return;
        }

        let streams = match envelope.streams() {
            Ok(streams) => streams,
            Err(e) => {
                warn!(%consumer_id, %seq, error = %e, "Dropping malformed search response");
                return;
            }
        };

        let streams = valid_catalog(streams);
        debug!(%consumer_id, %seq, count = streams.len(), "Presenting catalog");

        let selection = Selection::new(self.downgrade(), consumer_id, seq);
        self.inner.selector.present(consumer_id, streams, selection);
    }

    fn handle_data(&self, envelope: Envelope) {
        if let Some(ref error) = envelope.error {
            warn!(code = error.code, message = %error.message, "Server reported data error");
            return;
        }

        let Some(stream_id) = envelope.stream_id() else {
            warn!("Dropping data frame without stream id");
            return;
        };

        let Some(payload) = envelope.data else {
            return;
        };

        let delivery = {
            let state = self.inner.state.lock();
            Delivery::prepare(stream_id, payload, &state.registry, &state.widgets)
        };

        if let Some(delivery) = delivery {
            delivery.run();
        }
    }
}

// ============================================================================
// Router - Session Support
// ============================================================================

impl Router {
    /// Sends `subscribe` for every subscribed stream the current channel
    /// has not seen yet.
    ///
    /// Called after each successful (re)open, since the server keeps
    /// subscriptions per physical channel. A stream whose first subscriber
    /// arrived after the channel opened was already announced and is
    /// skipped. Returns the number of frames accepted by the sink.
    pub fn replay_subscriptions(&self) -> usize {
        let mut state = self.inner.state.lock();
        let sink = self.inner.sink.as_ref();

        let mut sent = 0;
        for stream in state.active.values_mut().filter(|s| !s.announced) {
            stream.announced = sink.send(&Envelope::subscribe(&stream.descriptor));
            if stream.announced {
                sent += 1;
            }
        }

        debug!(active = state.active.len(), sent, "Subscriptions replayed");
        sent
    }

    /// Reacts to the channel going away.
    ///
    /// Each widget waiting for a search gets [`Error::ConnectionClosed`].
    /// Subscriptions are kept and marked for the next
    /// [`replay_subscriptions`](Self::replay_subscriptions).
    pub fn channel_closed(&self) {
        let waiting: Vec<Arc<dyn Widget>> = {
            let mut state = self.inner.state.lock();
            for stream in state.active.values_mut() {
                stream.announced = false;
            }
            let consumers = state.discovery.reset();
            consumers
                .iter()
                .filter_map(|consumer_id| state.widgets.get(consumer_id).cloned())
                .collect()
        };

        if !waiting.is_empty() {
            debug!(count = waiting.len(), "Failing pending searches");
        }

        let error = Error::ConnectionClosed;
        for widget in waiting {
            widget.on_search_failed(&error);
        }
    }
}

// ============================================================================
// Router - Accessors
// ============================================================================

impl Router {
    /// Returns the consumers subscribed to a stream.
    #[must_use]
    pub fn consumers_for(&self, stream_id: &StreamId) -> FxHashSet<ConsumerId> {
        self.inner.state.lock().registry.consumers_for(stream_id)
    }

    /// Returns the streams a consumer is subscribed to.
    #[must_use]
    pub fn subscriptions(&self, consumer_id: ConsumerId) -> FxHashSet<StreamId> {
        self.inner.state.lock().registry.streams_for(consumer_id)
    }

    /// Returns descriptors of all streams with at least one subscriber.
    #[must_use]
    pub fn active_streams(&self) -> Vec<StreamDescriptor> {
        self.inner
            .state
            .lock()
            .active
            .values()
            .map(|stream| stream.descriptor.clone())
            .collect()
    }
}

/// Drops invalid or duplicate descriptors, keeping catalog order.
fn valid_catalog(streams: Vec<StreamDescriptor>) -> Vec<StreamDescriptor> {
    let mut seen = FxHashSet::default();

    streams
        .into_iter()
        .filter(|stream| {
            if let Err(reason) = stream.validate() {
                warn!(stream_id = %stream.id, %reason, "Skipping invalid stream");
                return false;
            }
            if !seen.insert(stream.id.clone()) {
                warn!(stream_id = %stream.id, "Skipping duplicate stream");
                return false;
            }
            true
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    // ------------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Envelope>>,
        closed: std::sync::atomic::AtomicBool,
    }

    impl RecordingSink {
        fn count(&self, command: &str) -> usize {
            self.frames
                .lock()
                .iter()
                .filter(|f| f.command == command)
                .count()
        }

        fn ids(&self, command: &str) -> Vec<String> {
            self.frames
                .lock()
                .iter()
                .filter(|f| f.command == command)
                .filter_map(|f| f.stream_id().map(|id| id.to_string()))
                .collect()
        }

        fn last(&self) -> Option<Envelope> {
            self.frames.lock().last().cloned()
        }

        fn set_closed(&self, closed: bool) {
            self.closed
                .store(closed, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl FrameSink for RecordingSink {
        fn send(&self, envelope: &Envelope) -> bool {
            if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
                return false;
            }
            self.frames.lock().push(envelope.clone());
            true
        }
    }

    #[derive(Default)]
    struct RecordingWidget {
        data: Mutex<Vec<Value>>,
        failures: Mutex<Vec<String>>,
    }

    impl Widget for RecordingWidget {
        fn on_data(&self, payload: &Value) {
            self.data.lock().push(payload.clone());
        }

        fn on_search_failed(&self, error: &Error) {
            self.failures.lock().push(error.to_string());
        }
    }

    /// Keeps presented selections so the test decides when to resolve.
    #[derive(Default)]
    struct HeldSelector {
        presented: Mutex<Vec<(ConsumerId, Vec<StreamDescriptor>, Selection)>>,
    }

    impl HeldSelector {
        fn take(&self) -> Vec<(ConsumerId, Vec<StreamDescriptor>, Selection)> {
            std::mem::take(&mut *self.presented.lock())
        }
    }

    impl StreamSelector for HeldSelector {
        fn present(&self, consumer_id: ConsumerId, streams: Vec<StreamDescriptor>, selection: Selection) {
            self.presented.lock().push((consumer_id, streams, selection));
        }
    }

    struct Fixture {
        sink: Arc<RecordingSink>,
        selector: Arc<HeldSelector>,
        router: Router,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(RecordingSink::default());
        let selector = Arc::new(HeldSelector::default());
        let router = Router::new(sink.clone(), selector.clone());
        Fixture {
            sink,
            selector,
            router,
        }
    }

    fn stream(id: &str) -> StreamDescriptor {
        StreamDescriptor {
            id: StreamId::new(id),
            name: id.to_uppercase(),
            unit: "uV".to_string(),
            frequency: 256.0,
            fields: Vec::new(),
            index: Vec::new(),
            stream_type: None,
        }
    }

    fn search_response(ids: &[&str]) -> Vec<u8> {
        let streams: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "id": id, "name": id.to_uppercase(), "unit": "uV", "frequency": 256 }))
            .collect();
        json!({ "command": "search", "data": { "streams": streams } })
            .to_string()
            .into_bytes()
    }

    // ------------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------------

    #[test]
    fn test_shared_stream_sends_one_subscribe() {
        let fx = fixture();
        let a = fx.router.attach(Arc::new(RecordingWidget::default()));
        let b = fx.router.attach(Arc::new(RecordingWidget::default()));

        assert!(fx.router.subscribe(a, &stream("s1")).expect("a"));
        assert!(fx.router.subscribe(b, &stream("s1")).expect("b"));
        assert_eq!(fx.sink.count("subscribe"), 1);

        assert!(fx.router.unsubscribe(a, &StreamId::new("s1")).expect("a"));
        assert_eq!(fx.sink.count("unsubscribe"), 0);

        assert!(fx.router.unsubscribe(b, &StreamId::new("s1")).expect("b"));
        assert_eq!(fx.sink.count("unsubscribe"), 1);
        assert!(fx.router.active_streams().is_empty());
    }

    #[test]
    fn test_repeated_subscribe_is_idempotent() {
        let fx = fixture();
        let a = fx.router.attach(Arc::new(RecordingWidget::default()));

        assert!(fx.router.subscribe(a, &stream("s1")).expect("first"));
        assert!(!fx.router.subscribe(a, &stream("s1")).expect("second"));

        assert_eq!(fx.router.consumers_for(&StreamId::new("s1")).len(), 1);
        assert_eq!(fx.sink.count("subscribe"), 1);
        assert!(!fx.router.unsubscribe(a, &StreamId::new("other")).expect("noop"));
    }

    #[test]
    fn test_unknown_consumer_rejected() {
        let fx = fixture();
        let ghost = ConsumerId::generate();

        assert!(matches!(
            fx.router.subscribe(ghost, &stream("s1")),
            Err(Error::UnknownConsumer { .. })
        ));
        assert!(matches!(
            fx.router.initiate_search(ghost),
            Err(Error::UnknownConsumer { .. })
        ));
        assert!(fx.sink.frames.lock().is_empty());
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    #[test]
    fn test_detach_unsubscribes_each_released_stream() {
        let fx = fixture();
        let c = fx.router.attach(Arc::new(RecordingWidget::default()));
        fx.router
            .apply_selection(c, vec![stream("A"), stream("B")])
            .expect("select");

        assert!(fx.router.detach(c));

        let mut released = fx.sink.ids("unsubscribe");
        released.sort();
        assert_eq!(released, vec!["A".to_string(), "B".to_string()]);
        assert!(!fx.router.is_attached(c));
        assert!(!fx.router.detach(c));
    }

    #[test]
    fn test_detach_keeps_streams_held_by_others() {
        let fx = fixture();
        let c = fx.router.attach(Arc::new(RecordingWidget::default()));
        let d = fx.router.attach(Arc::new(RecordingWidget::default()));
        fx.router.subscribe(c, &stream("A")).expect("c");
        fx.router.subscribe(d, &stream("A")).expect("d");

        fx.router.detach(c);

        assert_eq!(fx.sink.count("unsubscribe"), 0);
        assert_eq!(fx.router.subscriptions(d).len(), 1);
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    #[test]
    fn test_search_response_presents_catalog() {
        let fx = fixture();
        let x = fx.router.attach(Arc::new(RecordingWidget::default()));

        let seq = fx.router.initiate_search(x).expect("search");
        assert_eq!(fx.router.discovery_state(x), DiscoveryState::AwaitingResult(seq));
        assert_eq!(fx.sink.last(), Some(Envelope::search()));

        fx.router.handle_frame(&search_response(&["s1", "s2"]));
        assert_eq!(fx.router.discovery_state(x), DiscoveryState::Idle);

        let presented = fx.selector.take();
        assert_eq!(presented.len(), 1);
        let (consumer_id, streams, selection) = presented.into_iter().next().expect("one");
        assert_eq!(consumer_id, x);
        assert_eq!(selection.seq(), seq);
        assert_eq!(streams.len(), 2);

        // Flow is idle before the user answers.
        assert!(fx.router.initiate_search(x).is_ok());
        selection.dismiss();
    }

    #[test]
    fn test_stale_search_response_discarded() {
        let fx = fixture();
        let x = fx.router.attach(Arc::new(RecordingWidget::default()));

        let first = fx.router.initiate_search(x).expect("first");
        let second = fx.router.initiate_search(x).expect("second");
        assert!(second > first);

        fx.router.handle_frame(&search_response(&["old"]));
        assert!(fx.selector.take().is_empty());
        assert_eq!(fx.router.discovery_state(x), DiscoveryState::AwaitingResult(second));

        fx.router.handle_frame(&search_response(&["new"]));
        let presented = fx.selector.take();
        assert_eq!(presented.len(), 1);
        assert_eq!(presented[0].1[0].id.as_str(), "new");
        assert_eq!(presented[0].2.seq(), second);
    }

    #[test]
    fn test_search_error_notifies_widget() {
        let fx = fixture();
        let widget = Arc::new(RecordingWidget::default());
        let x = fx.router.attach(widget.clone());

        fx.router.initiate_search(x).expect("search");
        fx.router
            .handle_frame(br#"{"command":"search","error":{"code":503,"message":"catalog offline"}}"#);

        assert!(fx.selector.take().is_empty());
        assert_eq!(fx.router.discovery_state(x), DiscoveryState::Idle);
        let failures = widget.failures.lock();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("catalog offline"));
    }

    #[test]
    fn test_malformed_search_response_is_silent() {
        let fx = fixture();
        let widget = Arc::new(RecordingWidget::default());
        let x = fx.router.attach(widget.clone());

        fx.router.initiate_search(x).expect("search");
        fx.router
            .handle_frame(br#"{"command":"search","data":{"streams":"nope"}}"#);

        assert!(fx.selector.take().is_empty());
        assert!(widget.failures.lock().is_empty());
        assert_eq!(fx.router.discovery_state(x), DiscoveryState::Idle);
    }

    #[test]
    fn test_undecodable_entry_keeps_rest_of_catalog() {
        let fx = fixture();
        let widget = Arc::new(RecordingWidget::default());
        let x = fx.router.attach(widget.clone());

        fx.router.initiate_search(x).expect("search");
        let frame = json!({
            "command": "search",
            "data": { "streams": [
                { "id": "s1", "frequency": 256,
                  "fields": [{ "id": "ch1", "name": "Ch 1", "dtype": "f32" }] },
                { "id": "s2", "frequency": 256,
                  "fields": [{ "id": "ch1", "name": "Ch 1", "dtype": "i64" }] },
                { "id": "s3", "name": "no frequency" }
            ]}
        });
        fx.router.handle_frame(frame.to_string().as_bytes());

        let presented = fx.selector.take();
        assert_eq!(presented.len(), 1);
        let ids: Vec<&str> = presented[0].1.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1"]);
        assert!(widget.failures.lock().is_empty());
        assert_eq!(fx.router.discovery_state(x), DiscoveryState::Idle);
    }

    #[test]
    fn test_invalid_descriptors_filtered() {
        let fx = fixture();
        let x = fx.router.attach(Arc::new(RecordingWidget::default()));

        fx.router.initiate_search(x).expect("search");
        let frame = json!({
            "command": "search",
            "data": { "streams": [
                { "id": "ok", "frequency": 10 },
                { "id": "zero", "frequency": 0 },
                { "id": "ok", "frequency": 20 }
            ]}
        });
        fx.router.handle_frame(frame.to_string().as_bytes());

        let presented = fx.selector.take();
        let ids: Vec<&str> = presented[0].1.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn test_search_when_closed_stays_idle() {
        let fx = fixture();
        let x = fx.router.attach(Arc::new(RecordingWidget::default()));
        fx.sink.set_closed(true);

        assert!(matches!(
            fx.router.initiate_search(x),
            Err(Error::ConnectionClosed)
        ));
        assert_eq!(fx.router.discovery_state(x), DiscoveryState::Idle);

        // A stray response is not attributed to the failed request.
        fx.router.handle_frame(&search_response(&["s1"]));
        assert!(fx.selector.take().is_empty());
    }

    #[test]
    fn test_empty_selection_subscribes_nothing() {
        let fx = fixture();
        let x = fx.router.attach(Arc::new(RecordingWidget::default()));

        fx.router.initiate_search(x).expect("search");
        fx.router.handle_frame(&search_response(&["s1"]));

        let (_, _, selection) = fx.selector.take().pop().expect("presented");
        assert_eq!(selection.confirm(Vec::new()).expect("confirm"), 0);
        assert_eq!(fx.sink.count("subscribe"), 0);
    }

    #[test]
    fn test_selection_after_detach_ignored() {
        let fx = fixture();
        let x = fx.router.attach(Arc::new(RecordingWidget::default()));

        fx.router.initiate_search(x).expect("search");
        fx.router.handle_frame(&search_response(&["s1"]));
        let (_, streams, selection) = fx.selector.take().pop().expect("presented");

        fx.router.detach(x);

        assert!(matches!(
            selection.confirm(streams),
            Err(Error::UnknownConsumer { .. })
        ));
        assert_eq!(fx.sink.count("subscribe"), 0);
    }

    #[test]
    fn test_response_for_detached_consumer_is_stale() {
        let fx = fixture();
        let x = fx.router.attach(Arc::new(RecordingWidget::default()));
        let y = fx.router.attach(Arc::new(RecordingWidget::default()));

        fx.router.initiate_search(x).expect("x");
        fx.router.initiate_search(y).expect("y");
        fx.router.detach(x);

        fx.router.handle_frame(&search_response(&["for-x"]));
        assert!(fx.selector.take().is_empty());

        fx.router.handle_frame(&search_response(&["for-y"]));
        let presented = fx.selector.take();
        assert_eq!(presented[0].0, y);
    }

    #[test]
    fn test_channel_closed_fails_waiting_widgets() {
        let fx = fixture();
        let widget = Arc::new(RecordingWidget::default());
        let x = fx.router.attach(widget.clone());
        fx.router.subscribe(x, &stream("s1")).expect("subscribe");

        fx.router.initiate_search(x).expect("search");
        fx.router.channel_closed();

        assert_eq!(fx.router.discovery_state(x), DiscoveryState::Idle);
        assert_eq!(widget.failures.lock().as_slice(), ["Connection closed"]);
        assert_eq!(fx.router.subscriptions(x).len(), 1);

        // Late answer from the old channel has nothing to match.
        fx.router.handle_frame(&search_response(&["s1"]));
        assert!(fx.selector.take().is_empty());
    }

    // ------------------------------------------------------------------------
    // Data routing
    // ------------------------------------------------------------------------

    #[test]
    fn test_data_fans_out_to_all_subscribers() {
        let fx = fixture();
        let a = Arc::new(RecordingWidget::default());
        let b = Arc::new(RecordingWidget::default());
        let other = Arc::new(RecordingWidget::default());
        let ia = fx.router.attach(a.clone());
        let ib = fx.router.attach(b.clone());
        let io = fx.router.attach(other.clone());
        fx.router.subscribe(ia, &stream("s1")).expect("a");
        fx.router.subscribe(ib, &stream("s1")).expect("b");
        fx.router.subscribe(io, &stream("s2")).expect("other");

        fx.router
            .handle_frame(br#"{"command":"data","data":{"id":"s1","value":1}}"#);

        assert_eq!(a.data.lock().len(), 1);
        assert_eq!(b.data.lock().len(), 1);
        assert!(other.data.lock().is_empty());
    }

    #[test]
    fn test_data_for_unknown_stream_dropped() {
        let fx = fixture();
        let widget = Arc::new(RecordingWidget::default());
        let x = fx.router.attach(widget.clone());
        fx.router.subscribe(x, &stream("s1")).expect("subscribe");

        fx.router
            .handle_frame(br#"{"command":"data","data":{"id":"ghost","value":1}}"#);
        fx.router
            .handle_frame(br#"{"command":"data","data":{"value":1}}"#);

        assert!(widget.data.lock().is_empty());
        assert!(widget.failures.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe_stops_future_data() {
        let fx = fixture();
        let widget = Arc::new(RecordingWidget::default());
        let x = fx.router.attach(widget.clone());
        fx.router.subscribe(x, &stream("s1")).expect("subscribe");

        fx.router
            .handle_frame(br#"{"command":"data","data":{"id":"s1","value":1}}"#);
        fx.router.unsubscribe(x, &StreamId::new("s1")).expect("unsubscribe");
        fx.router
            .handle_frame(br#"{"command":"data","data":{"id":"s1","value":2}}"#);

        assert_eq!(widget.data.lock().as_slice(), [json!({ "id": "s1", "value": 1 })]);
    }

    #[test]
    fn test_garbage_and_unknown_frames_ignored() {
        let fx = fixture();
        let widget = Arc::new(RecordingWidget::default());
        let x = fx.router.attach(widget.clone());
        fx.router.subscribe(x, &stream("s1")).expect("subscribe");

        fx.router.handle_frame(b"{oops");
        fx.router.handle_frame(br#"{"data":{"id":"s1"}}"#);
        fx.router.handle_frame(br#"{"command":"heartbeat","data":{"id":"s1"}}"#);
        fx.router
            .handle_frame(br#"{"command":"subscribe","error":{"code":1,"message":"no such stream"}}"#);

        assert!(widget.data.lock().is_empty());
        assert!(widget.failures.lock().is_empty());
    }

    #[test]
    fn test_widget_may_detach_during_callback() {
        struct SelfDetaching {
            router: Mutex<Option<WeakRouter>>,
            id: Mutex<Option<ConsumerId>>,
            calls: std::sync::atomic::AtomicUsize,
        }

        impl Widget for SelfDetaching {
            fn on_data(&self, _payload: &Value) {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let router = self.router.lock().as_ref().and_then(WeakRouter::upgrade);
                if let (Some(router), Some(id)) = (router, *self.id.lock()) {
                    router.detach(id);
                }
            }
        }

        let fx = fixture();
        let widget = Arc::new(SelfDetaching {
            router: Mutex::new(Some(fx.router.downgrade())),
            id: Mutex::new(None),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let id = fx.router.attach(widget.clone());
        *widget.id.lock() = Some(id);
        fx.router.subscribe(id, &stream("s1")).expect("subscribe");

        fx.router
            .handle_frame(br#"{"command":"data","data":{"id":"s1","value":1}}"#);
        fx.router
            .handle_frame(br#"{"command":"data","data":{"id":"s1","value":2}}"#);

        assert_eq!(widget.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(fx.sink.count("unsubscribe"), 1);
    }

    // ------------------------------------------------------------------------
    // Session support
    // ------------------------------------------------------------------------

    #[test]
    fn test_replay_sends_one_subscribe_per_active_stream() {
        let fx = fixture();
        let a = fx.router.attach(Arc::new(RecordingWidget::default()));
        let b = fx.router.attach(Arc::new(RecordingWidget::default()));
        fx.router.subscribe(a, &stream("s1")).expect("a1");
        fx.router.subscribe(b, &stream("s1")).expect("b1");
        fx.router.subscribe(b, &stream("s2")).expect("b2");
        fx.router.channel_closed();
        fx.sink.frames.lock().clear();

        assert_eq!(fx.router.replay_subscriptions(), 2);

        let mut ids = fx.sink.ids("subscribe");
        ids.sort();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn test_subscribe_while_closed_is_replayed() {
        let fx = fixture();
        let a = fx.router.attach(Arc::new(RecordingWidget::default()));

        fx.sink.set_closed(true);
        fx.router.subscribe(a, &stream("s1")).expect("subscribe");
        assert_eq!(fx.sink.count("subscribe"), 0);

        fx.sink.set_closed(false);
        assert_eq!(fx.router.replay_subscriptions(), 1);
        assert_eq!(fx.sink.count("subscribe"), 1);
    }

    #[test]
    fn test_replay_skips_streams_announced_on_current_channel() {
        let fx = fixture();
        let a = fx.router.attach(Arc::new(RecordingWidget::default()));
        let b = fx.router.attach(Arc::new(RecordingWidget::default()));

        // Recorded while closed.
        fx.sink.set_closed(true);
        fx.router.subscribe(a, &stream("old")).expect("old");

        // Channel opens; a first subscriber lands before the replay runs.
        fx.sink.set_closed(false);
        fx.router.subscribe(b, &stream("fresh")).expect("fresh");
        assert_eq!(fx.router.replay_subscriptions(), 1);

        let mut ids = fx.sink.ids("subscribe");
        ids.sort();
        assert_eq!(ids, vec!["fresh".to_string(), "old".to_string()]);

        // Nothing left to announce on this channel.
        assert_eq!(fx.router.replay_subscriptions(), 0);

        // The next channel needs both again.
        fx.router.channel_closed();
        assert_eq!(fx.router.replay_subscriptions(), 2);
        assert_eq!(fx.sink.count("subscribe"), 4);
    }

    // ------------------------------------------------------------------------
    // End to end
    // ------------------------------------------------------------------------

    #[test]
    fn test_end_to_end_scenario() {
        let sink = Arc::new(RecordingSink::default());
        let selector = |_: ConsumerId, streams: Vec<StreamDescriptor>, selection: Selection| {
            let chosen = streams.into_iter().filter(|s| s.id.as_str() == "s1").collect();
            selection.confirm(chosen).expect("confirm");
        };
        let router = Router::new(sink.clone(), Arc::new(selector));

        let widget = Arc::new(RecordingWidget::default());
        let x = router.attach(widget.clone());

        router.initiate_search(x).expect("search");
        assert_eq!(sink.last(), Some(Envelope::search()));

        let response = json!({
            "command": "search",
            "data": { "streams": [{
                "id": "s1",
                "name": "EEG",
                "fields": [{ "id": "ch1", "name": "Ch 1", "description": "", "dtype": "f32" }],
                "index": [{ "id": "t", "name": "Time", "description": "", "dtype": "f64" }],
                "unit": "uV",
                "frequency": 256
            }]}
        });
        router.handle_frame(response.to_string().as_bytes());

        assert_eq!(
            serde_json::to_value(sink.last().expect("subscribe")).expect("json"),
            json!({ "command": "subscribe", "data": { "id": "s1", "name": "EEG" } })
        );

        router.handle_frame(br#"{"command":"data","data":{"id":"s1","value":12.3}}"#);

        assert_eq!(
            widget.data.lock().as_slice(),
            [json!({ "id": "s1", "value": 12.3 })]
        );
    }
}
