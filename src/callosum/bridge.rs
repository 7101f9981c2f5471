//! The Corpus Callosum: the bridge between the Internal and External tracts.
//!
//! [`CorpusCallosum`] composes the reactive substrate — one
//! [`ReactiveStream`] and one [`CircuitBreaker`] per tract, an optional
//! [`EventStore`], and an optional [`PatternSynthesizer`] — behind a small
//! facade: route, subscribe, replay, stats.
//!
//! The bridge is an explicitly constructed root with a `start()`/`stop()`
//! lifecycle; nothing here is a process-wide singleton.
//!
//! # Example
//!
//! ```rust,no_run
//! use callosum::{CorpusCallosum, MessagePayload, MessagePriority, TractType};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let bridge = Arc::new(CorpusCallosum::new());
//! bridge.start().await.ok();
//!
//! let id = bridge
//!     .route_message(
//!         TractType::Internal,
//!         TractType::External,
//!         MessagePriority::Normal,
//!         MessagePayload::Json(serde_json::json!({"hello": "world"})),
//!         0,
//!     )
//!     .await;
//! assert!(id >= 0);
//!
//! let mut feed = bridge.subscribe("agent-1", TractType::External).await;
//! while let Some(message) = feed.next().await {
//!     // process, then loop; the feed re-issues one credit per message
//!     # let _ = message; break;
//! }
//! # }
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::callosum::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::callosum::event_store::{
    ConsciousnessMetrics, EventStore, EventStoreUnavailable, ReplayCursor,
};
use crate::callosum::message::{
    Message, MessagePayload, MessagePriority, MessageStats, TractType,
};
use crate::callosum::stream::{BackpressureConfig, ReactiveStream, StreamSubscription};
use crate::callosum::synthesis::{EmergenceEvent, PatternSynthesizer, DEFAULT_WINDOW_SIZE};

/// Default idle timeout for subscription feeds (liveness safeguard, not a
/// data-loss event).
pub const DEFAULT_FEED_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default per-subscriber queue capacity used by [`CorpusCallosum::subscribe`].
const DEFAULT_SUBSCRIBER_BUFFER: usize = 100;

struct BridgeShared {
    next_message_id: i64,
    stats: MessageStats,
}

/// The consciousness bridge: routing, subscription, replay, and metrics over
/// the two tract streams.
pub struct CorpusCallosum {
    internal_stream: Arc<ReactiveStream>,
    external_stream: Arc<ReactiveStream>,
    internal_breaker: CircuitBreaker,
    external_breaker: CircuitBreaker,
    event_store: Option<Box<dyn EventStore>>,
    synthesizer: Option<StdMutex<PatternSynthesizer>>,
    shared: Mutex<BridgeShared>,
}

impl Default for CorpusCallosum {
    fn default() -> Self {
        Self::new()
    }
}

impl CorpusCallosum {
    /// Create a bridge with default backpressure and breaker configuration,
    /// pattern synthesis enabled, and no event store.
    pub fn new() -> Self {
        Self::with_configs(BackpressureConfig::default(), CircuitBreakerConfig::default())
    }

    /// Create a bridge with explicit stream and breaker configuration.
    pub fn with_configs(
        backpressure: BackpressureConfig,
        circuit: CircuitBreakerConfig,
    ) -> Self {
        Self {
            internal_stream: ReactiveStream::new(TractType::Internal, backpressure.clone()),
            external_stream: ReactiveStream::new(TractType::External, backpressure),
            internal_breaker: CircuitBreaker::new(circuit.clone()),
            external_breaker: CircuitBreaker::new(circuit),
            event_store: None,
            synthesizer: Some(StdMutex::new(PatternSynthesizer::default())),
            shared: Mutex::new(BridgeShared {
                next_message_id: 0,
                stats: MessageStats::default(),
            }),
        }
    }

    /// Attach an event store (builder pattern). Routed messages are appended
    /// to it; append failures are logged and never abort routing.
    pub fn with_event_store(mut self, store: Box<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Disable windowed emergence detection (builder pattern).
    pub fn without_pattern_synthesis(mut self) -> Self {
        self.synthesizer = None;
        self
    }

    /// Start the tract distributors and connect the event store.
    ///
    /// An unreachable event store is reported but leaves the bridge fully
    /// routable — metrics simply degrade until the backend recovers.
    pub async fn start(&self) -> Result<(), EventStoreUnavailable> {
        self.internal_stream.start();
        self.external_stream.start();
        if let Some(store) = &self.event_store {
            store.connect().await?;
        }
        log::info!("corpus callosum started");
        Ok(())
    }

    /// Stop the distributors and disconnect the event store.
    pub async fn stop(&self) {
        self.internal_stream.stop().await;
        self.external_stream.stop().await;
        if let Some(store) = &self.event_store {
            store.disconnect().await;
        }
        log::info!("corpus callosum stopped");
    }

    fn select(&self, dest: TractType) -> (&CircuitBreaker, &Arc<ReactiveStream>) {
        match dest {
            TractType::Internal => (&self.internal_breaker, &self.internal_stream),
            TractType::External => (&self.external_breaker, &self.external_stream),
        }
    }

    /// Route a message from `source` to `dest`.
    ///
    /// Returns the assigned message id, or `-1` when the destination circuit
    /// is open or the destination stream's buffer is full. Both refusals are
    /// counted as loss.
    pub async fn route_message(
        &self,
        source: TractType,
        dest: TractType,
        priority: MessagePriority,
        payload: MessagePayload,
        payload_size: usize,
    ) -> i64 {
        let (breaker, stream) = self.select(dest);

        if breaker.try_acquire().await.is_err() {
            log::warn!("circuit open for {} tract, message dropped", dest);
            self.shared.lock().await.stats.message_loss_count += 1;
            return -1;
        }

        let message_id = {
            let mut shared = self.shared.lock().await;
            let id = shared.next_message_id;
            shared.next_message_id += 1;
            id
        };

        let message = Message {
            id: message_id,
            source_tract: source,
            dest_tract: dest,
            priority,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            payload_size,
            payload,
        };

        if !stream.publish(message.clone()).await {
            // A saturated tract is the route path's observable failure mode.
            breaker.record_failure().await;
            self.shared.lock().await.stats.message_loss_count += 1;
            return -1;
        }
        breaker.record_success().await;

        let depth = stream.pending_len().await;
        {
            let mut shared = self.shared.lock().await;
            shared.stats.total_messages += 1;
            match dest {
                TractType::Internal => shared.stats.messages_to_internal += 1,
                TractType::External => shared.stats.messages_to_external += 1,
            }
            if depth > shared.stats.peak_queue_depth {
                shared.stats.peak_queue_depth = depth;
            }
        }

        if let Some(store) = &self.event_store {
            if let Err(e) = store.append(&message).await {
                log::error!("failed to persist event for message {}: {}", message_id, e);
            }
        }

        if let Some(synth) = &self.synthesizer {
            let mut synth = synth.lock().unwrap();
            synth.add_event(&message);
            if let Some(event) = synth.detect_emergence(DEFAULT_WINDOW_SIZE) {
                log::info!("emergence detected: {}", event.description);
            }
        }

        message_id
    }

    /// Subscribe to a tract, returning a [`MessageFeed`] that applies
    /// backpressure automatically: exactly one credit is requested per
    /// delivered message, with a 1 s idle re-issue as a liveness safeguard.
    pub async fn subscribe(&self, subscriber_id: &str, tract: TractType) -> MessageFeed {
        self.subscribe_with_buffer(subscriber_id, tract, DEFAULT_SUBSCRIBER_BUFFER)
            .await
    }

    /// [`CorpusCallosum::subscribe`] with an explicit subscriber queue
    /// capacity (which is also the subscription's initial demand).
    pub async fn subscribe_with_buffer(
        &self,
        subscriber_id: &str,
        tract: TractType,
        buffer_size: usize,
    ) -> MessageFeed {
        let stream = match tract {
            TractType::Internal => &self.internal_stream,
            TractType::External => &self.external_stream,
        };
        let subscription = stream.subscribe(subscriber_id, buffer_size).await;
        MessageFeed {
            stream: Arc::clone(stream),
            subscription,
            subscriber_id: subscriber_id.to_string(),
            idle_timeout: DEFAULT_FEED_IDLE_TIMEOUT,
            cancelled: false,
        }
    }

    /// Replay persisted events within an optional `[from, to]` timestamp
    /// window. Returns `None` when no event store is attached.
    pub fn replay_history(
        &self,
        from_timestamp_ms: Option<i64>,
        to_timestamp_ms: Option<i64>,
    ) -> Option<ReplayCursor<'_>> {
        match &self.event_store {
            Some(store) => Some(ReplayCursor::new(
                store.as_ref(),
                from_timestamp_ms,
                to_timestamp_ms,
            )),
            None => {
                log::warn!("event store not enabled, cannot replay history");
                None
            }
        }
    }

    /// Snapshot of the routing statistics.
    pub async fn get_stats(&self) -> MessageStats {
        self.shared.lock().await.stats.clone()
    }

    /// Reset routing statistics to zero.
    pub async fn reset_stats(&self) {
        self.shared.lock().await.stats = MessageStats::default();
    }

    /// Snapshot of the consciousness metrics, when an event store is attached.
    pub async fn get_consciousness_metrics(&self) -> Option<ConsciousnessMetrics> {
        match &self.event_store {
            Some(store) => Some(store.get_metrics().await),
            None => None,
        }
    }

    /// Every emergence event the synthesizer has retained.
    pub fn get_emergence_events(&self) -> Vec<EmergenceEvent> {
        match &self.synthesizer {
            Some(synth) => synth.lock().unwrap().emergence_events(),
            None => Vec::new(),
        }
    }
}

/// An async sequence of messages for one subscriber, with automatic
/// backpressure.
///
/// Call [`MessageFeed::next`] in a loop; each delivered message consumed one
/// credit and the next call requests another. Dropping the feed (or calling
/// [`MessageFeed::cancel`]) unsubscribes.
pub struct MessageFeed {
    stream: Arc<ReactiveStream>,
    subscription: StreamSubscription,
    subscriber_id: String,
    idle_timeout: Duration,
    cancelled: bool,
}

impl MessageFeed {
    /// Await the next message.
    ///
    /// Returns `None` once the subscription has been cancelled. Idle periods
    /// simply re-issue credit and keep waiting.
    pub async fn next(&mut self) -> Option<Message> {
        while self.subscription.is_active() {
            self.subscription.request(1);
            match tokio::time::timeout(self.idle_timeout, self.subscription.recv()).await {
                Ok(message) => return message,
                Err(_) => continue,
            }
        }
        None
    }

    /// Explicitly unsubscribe from the tract stream.
    pub async fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            self.stream.unsubscribe(&self.subscriber_id).await;
        }
    }

    /// Id this feed subscribed under.
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }
}

impl Drop for MessageFeed {
    fn drop(&mut self) {
        if self.cancelled {
            return;
        }
        // Best-effort async unsubscribe; inside a runtime this detaches a
        // small cleanup task, outside one the subscription is simply left for
        // the stream to retire when it stops.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let stream = Arc::clone(&self.stream);
            let id = self.subscriber_id.clone();
            handle.spawn(async move {
                stream.unsubscribe(&id).await;
            });
        }
    }
}
