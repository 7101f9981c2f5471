//! Reactive per-tract message streams with explicit-demand backpressure.
//!
//! One [`ReactiveStream`] exists per tract. Producers publish into a bounded
//! pending buffer (full buffer = drop-and-count, never block); a single
//! background distributor drains that buffer into per-subscriber queues,
//! round-robin across subscribers with outstanding demand.
//!
//! The backpressure contract: a subscriber consumes by requesting credit via
//! [`StreamSubscription::request`], awaiting a message, processing it, and
//! requesting again. The stream never delivers to a subscriber whose
//! outstanding demand is zero or below.
//!
//! ```text
//! publish ──> [pending buffer (bounded)] ──distributor tick──> subscriber A queue
//!                                        └─(round-robin, demand > 0)─> subscriber B queue
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::callosum::message::{Message, TractType};

/// Backpressure configuration for a [`ReactiveStream`].
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Maximum messages buffered in the stream's pending buffer.
    pub buffer_size: usize,
    /// Granularity of the background distribution loop.
    pub distribution_tick: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            distribution_tick: Duration::from_millis(10),
        }
    }
}

struct SubscriptionInner {
    subscriber_id: String,
    tract: TractType,
    capacity: usize,
    queue: StdMutex<VecDeque<Message>>,
    notify: Notify,
    /// Outstanding demand. Delivery only happens while this is positive.
    requested: AtomicI64,
    delivered: AtomicU64,
    active: AtomicBool,
}

impl SubscriptionInner {
    /// Try to hand the message to this subscriber. Returns the message back
    /// when the subscriber is inactive, has no demand, or its queue is full.
    fn try_push(&self, message: Message) -> Result<(), Message> {
        if !self.active.load(Ordering::Acquire) {
            return Err(message);
        }
        if self.requested.load(Ordering::Acquire) <= 0 {
            return Err(message);
        }
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.capacity {
                return Err(message);
            }
            queue.push_back(message);
        }
        self.requested.fetch_sub(1, Ordering::AcqRel);
        self.delivered.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
        Ok(())
    }
}

/// A handle to one subscription on a [`ReactiveStream`].
///
/// Handles are cheap to clone; all clones observe the same queue and demand
/// counter. Dropping handles does not unsubscribe — call
/// [`ReactiveStream::unsubscribe`] (or let the owning
/// [`MessageFeed`](crate::callosum::bridge::MessageFeed) do it).
///
/// # Example
///
/// ```rust,no_run
/// # use callosum::stream::{ReactiveStream, BackpressureConfig};
/// # use callosum::TractType;
/// # async fn example(stream: &ReactiveStream) {
/// let sub = stream.subscribe("agent-1", 16).await;
/// loop {
///     sub.request(1);
///     match sub.recv().await {
///         Some(message) => { /* process */ }
///         None => break, // unsubscribed
///     }
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct StreamSubscription {
    inner: Arc<SubscriptionInner>,
}

impl StreamSubscription {
    /// Request `n` more message credits (backpressure signal).
    pub fn request(&self, n: u32) {
        self.inner.requested.fetch_add(n as i64, Ordering::AcqRel);
    }

    /// Await the next delivered message.
    ///
    /// Returns `None` once the subscription has been deactivated and its
    /// queue is drained.
    pub async fn recv(&self) -> Option<Message> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(message) = self.inner.queue.lock().unwrap().pop_front() {
                return Some(message);
            }
            if !self.inner.active.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Id this subscription was registered under.
    pub fn subscriber_id(&self) -> &str {
        &self.inner.subscriber_id
    }

    /// Tract this subscription listens on.
    pub fn tract(&self) -> TractType {
        self.inner.tract
    }

    /// Messages delivered so far. Never decreases.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Acquire)
    }

    /// Current outstanding demand.
    pub fn outstanding_demand(&self) -> i64 {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Whether the subscription is still attached to its stream.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Messages currently sitting in the subscriber queue.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }
}

struct StreamState {
    pending: VecDeque<Message>,
    subscribers: Vec<Arc<SubscriptionInner>>,
    rr_cursor: usize,
}

/// A per-tract reactive message stream.
///
/// Owns the pending buffer and every subscription on the tract. A single
/// distributor task (started via [`ReactiveStream::start`]) moves messages
/// from the pending buffer into subscriber queues on a fixed tick.
pub struct ReactiveStream {
    tract: TractType,
    config: BackpressureConfig,
    state: Mutex<StreamState>,
    distributor: StdMutex<Option<JoinHandle<()>>>,
}

impl ReactiveStream {
    pub fn new(tract: TractType, config: BackpressureConfig) -> Arc<Self> {
        Arc::new(Self {
            tract,
            config,
            state: Mutex::new(StreamState {
                pending: VecDeque::new(),
                subscribers: Vec::new(),
                rr_cursor: 0,
            }),
            distributor: StdMutex::new(None),
        })
    }

    /// Start the background distribution loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.distributor.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let stream = Arc::clone(self);
        let tick = self.config.distribution_tick;
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                stream.distribute_once().await;
            }
        }));
    }

    /// Stop the distribution loop. Pending messages stay buffered.
    pub async fn stop(&self) {
        let handle = self.distributor.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Publish a message into the pending buffer.
    ///
    /// Returns `false` when the buffer is full — the message is dropped, not
    /// queued, and the caller is expected to count the loss.
    pub async fn publish(&self, message: Message) -> bool {
        let mut state = self.state.lock().await;
        if state.pending.len() >= self.config.buffer_size {
            log::warn!(
                "stream buffer full for {} tract, dropping message {}",
                self.tract,
                message.id
            );
            return false;
        }
        state.pending.push_back(message);
        true
    }

    /// Subscribe with the given per-subscriber queue capacity.
    ///
    /// Initial demand equals the capacity. Re-subscribing an id that is still
    /// active is idempotent and returns a handle to the existing
    /// subscription.
    pub async fn subscribe(&self, subscriber_id: &str, buffer_size: usize) -> StreamSubscription {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .subscribers
            .iter()
            .find(|s| s.subscriber_id == subscriber_id && s.active.load(Ordering::Acquire))
        {
            return StreamSubscription {
                inner: Arc::clone(existing),
            };
        }

        let inner = Arc::new(SubscriptionInner {
            subscriber_id: subscriber_id.to_string(),
            tract: self.tract,
            capacity: buffer_size,
            queue: StdMutex::new(VecDeque::new()),
            notify: Notify::new(),
            requested: AtomicI64::new(buffer_size as i64),
            delivered: AtomicU64::new(0),
            active: AtomicBool::new(true),
        });
        state.subscribers.push(Arc::clone(&inner));
        log::info!(
            "subscriber {} joined stream for {} tract",
            subscriber_id,
            self.tract
        );
        StreamSubscription { inner }
    }

    /// Mark a subscription inactive. It is removed from the stream on the
    /// next distribution tick; any blocked `recv` wakes and observes `None`.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        let state = self.state.lock().await;
        for sub in state.subscribers.iter() {
            if sub.subscriber_id == subscriber_id {
                sub.active.store(false, Ordering::Release);
                sub.notify.notify_waiters();
                log::info!(
                    "subscriber {} left stream for {} tract",
                    subscriber_id,
                    self.tract
                );
            }
        }
    }

    /// Messages currently waiting in the pending buffer.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Number of attached (possibly inactive-until-next-tick) subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// One distribution sweep: drop inactive subscriptions, then move
    /// messages to subscribers with demand, round-robin, until the buffer is
    /// empty, nobody can accept, or the per-sweep cap is reached.
    async fn distribute_once(&self) {
        let mut state = self.state.lock().await;
        state
            .subscribers
            .retain(|s| s.active.load(Ordering::Acquire));

        if state.pending.is_empty() || state.subscribers.is_empty() {
            return;
        }

        // Cap one sweep so a flood cannot monopolize the stream lock.
        let max_per_sweep = state.subscribers.len() * 10;
        let mut distributed = 0;

        while let Some(message) = state.pending.pop_front() {
            if distributed >= max_per_sweep {
                state.pending.push_front(message);
                break;
            }

            let count = state.subscribers.len();
            let mut carry = Some(message);
            for offset in 0..count {
                let idx = (state.rr_cursor + offset) % count;
                let candidate = match carry.take() {
                    Some(m) => m,
                    None => break,
                };
                match state.subscribers[idx].try_push(candidate) {
                    Ok(()) => {
                        state.rr_cursor = (idx + 1) % count;
                        distributed += 1;
                        break;
                    }
                    Err(returned) => carry = Some(returned),
                }
            }

            if let Some(unclaimed) = carry {
                // Head-of-line message goes back to the front; wait for the
                // next tick so ordering is preserved.
                state.pending.push_front(unclaimed);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callosum::message::{MessagePayload, MessagePriority};

    fn test_message(id: i64) -> Message {
        Message {
            id,
            source_tract: TractType::Internal,
            dest_tract: TractType::External,
            priority: MessagePriority::Normal,
            timestamp_ms: id,
            payload_size: 0,
            payload: MessagePayload::Json(serde_json::json!({ "n": id })),
        }
    }

    #[tokio::test]
    async fn publish_rejects_when_full() {
        let stream = ReactiveStream::new(
            TractType::External,
            BackpressureConfig {
                buffer_size: 2,
                ..Default::default()
            },
        );
        assert!(stream.publish(test_message(0)).await);
        assert!(stream.publish(test_message(1)).await);
        assert!(!stream.publish(test_message(2)).await);
        assert_eq!(stream.pending_len().await, 2);
    }

    #[tokio::test]
    async fn no_delivery_without_demand() {
        let stream = ReactiveStream::new(TractType::External, BackpressureConfig::default());
        let sub = stream.subscribe("s1", 4).await;
        // Exhaust the initial demand.
        sub.inner.requested.store(0, Ordering::Release);

        stream.publish(test_message(0)).await;
        stream.distribute_once().await;
        assert_eq!(sub.queued(), 0);
        assert_eq!(stream.pending_len().await, 1);

        sub.request(1);
        stream.distribute_once().await;
        assert_eq!(sub.queued(), 1);
        assert_eq!(stream.pending_len().await, 0);
    }

    #[tokio::test]
    async fn per_subscriber_order_preserved() {
        let stream = ReactiveStream::new(TractType::External, BackpressureConfig::default());
        let sub = stream.subscribe("s1", 32).await;
        for i in 0..10 {
            stream.publish(test_message(i)).await;
        }
        stream.distribute_once().await;
        let mut last = -1;
        for _ in 0..10 {
            let message = sub.recv().await.unwrap();
            assert!(message.id > last);
            last = message.id;
        }
    }

    #[tokio::test]
    async fn resubscribe_is_idempotent() {
        let stream = ReactiveStream::new(TractType::Internal, BackpressureConfig::default());
        let a = stream.subscribe("same", 8).await;
        let b = stream.subscribe("same", 8).await;
        assert_eq!(stream.subscriber_count().await, 1);
        a.request(1);
        // Both handles observe the same demand counter.
        assert_eq!(b.outstanding_demand(), a.outstanding_demand());
    }

    #[tokio::test]
    async fn unsubscribe_wakes_blocked_recv() {
        let stream = ReactiveStream::new(TractType::Internal, BackpressureConfig::default());
        let sub = stream.subscribe("s1", 4).await;
        let waiter = tokio::spawn({
            let sub = sub.clone();
            async move { sub.recv().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.unsubscribe("s1").await;
        assert!(waiter.await.unwrap().is_none());
        stream.distribute_once().await;
        assert_eq!(stream.subscriber_count().await, 0);
    }
}
