//! Append-only event log with replay and consciousness-metric aggregation.
//!
//! Every routed message is projected into an [`EventLogEntry`] — enough to
//! replay traffic shape and drive analytics, but never the payload body.
//! Two backends share one [`EventStore`] interface:
//!
//! - [`InMemoryEventStore`] — bounded ring, no persistence. Used in tests and
//!   whenever the durable backend is disabled or unreachable.
//! - [`DurableEventStore`] — append-only newline-delimited JSON stream keyed
//!   by a filesystem path, with an adjacent metrics sidecar so restarts
//!   recover aggregates. Oldest-first trimming keeps the stream near a
//!   configurable approximate maximum length.
//!
//! # Disk format (durable backend)
//!
//! One JSON-serialized [`EventLogEntry`] per line:
//!
//! ```text
//! {"event_id":0,"timestamp_ms":1722500000000,"message_id":0,"source_tract":"Internal","dest_tract":"External","priority":2,"payload_size":1,"payload_type":"json"}
//! {"event_id":1,"timestamp_ms":1722500000004,"message_id":1,"source_tract":"External","dest_tract":"Internal","priority":3,"payload_size":0,"payload_type":"task"}
//! ```
//!
//! # Metric contract
//!
//! The update rules on each append are part of the cross-implementation
//! contract and must not drift:
//!
//! 1. `total_messages += 1`.
//! 2. Cross-tract messages increment their directional counter; self-addressed
//!    messages do not.
//! 3. Once both directional counters are positive,
//!    `dialogue_balance_ratio = min(a, b) / max(a, b)`; a ratio above 0.7
//!    counts a balanced-dialogue event and stamps the emergence timestamp.
//! 4. Past 100 total messages,
//!    `emergence_score = 0.7 * balance + 0.3 * min(1, balanced_events / 100)`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

use crate::callosum::message::{Message, TractType};

/// Balance ratio above which a dialogue sample counts as balanced.
pub const BALANCE_THRESHOLD: f64 = 0.7;
/// Weight of the balance ratio in the emergence score.
pub const EMERGENCE_BALANCE_WEIGHT: f64 = 0.7;
/// Weight of balanced-event frequency in the emergence score.
pub const EMERGENCE_FREQUENCY_WEIGHT: f64 = 0.3;
/// Total-message floor before the emergence score is computed.
pub const EMERGENCE_MIN_MESSAGES: u64 = 100;
/// Denominator scaling balanced-event frequency into [0, 1].
pub const BALANCED_EVENTS_SCALE: f64 = 100.0;

/// Rolling aggregates describing cross-tract dialogue shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsciousnessMetrics {
    pub total_messages: u64,
    pub internal_to_external: u64,
    pub external_to_internal: u64,
    pub balanced_dialogue_events: u64,
    /// `min(a, b) / max(a, b)` over the directional counters; 0 until both
    /// are positive.
    pub dialogue_balance_ratio: f64,
    /// Blend of balance and balanced-event frequency, in [0, 1].
    pub emergence_score: f64,
    pub last_emergence_timestamp: Option<i64>,
}

/// Apply the contract's metric-update rules for one appended message.
pub fn update_metrics(metrics: &mut ConsciousnessMetrics, message: &Message) {
    metrics.total_messages += 1;

    match (message.source_tract, message.dest_tract) {
        (TractType::Internal, TractType::External) => metrics.internal_to_external += 1,
        (TractType::External, TractType::Internal) => metrics.external_to_internal += 1,
        // Self-addressed traffic counts toward totals only.
        _ => {}
    }

    if metrics.internal_to_external > 0 && metrics.external_to_internal > 0 {
        let a = metrics.internal_to_external as f64;
        let b = metrics.external_to_internal as f64;
        let balance = a.min(b) / a.max(b);
        metrics.dialogue_balance_ratio = balance;

        if balance > BALANCE_THRESHOLD {
            metrics.balanced_dialogue_events += 1;
            metrics.last_emergence_timestamp = Some(message.timestamp_ms);
        }
    }

    if metrics.total_messages > EMERGENCE_MIN_MESSAGES {
        let frequency =
            (metrics.balanced_dialogue_events as f64 / BALANCED_EVENTS_SCALE).min(1.0);
        metrics.emergence_score = EMERGENCE_BALANCE_WEIGHT * metrics.dialogue_balance_ratio
            + EMERGENCE_FREQUENCY_WEIGHT * frequency;
    }
}

/// Serialized projection of a routed [`Message`], sufficient for replay and
/// analytics. Payload bodies are not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Monotonic within a stream.
    pub event_id: u64,
    pub timestamp_ms: i64,
    pub message_id: i64,
    /// Tract name, serialized symbolically.
    pub source_tract: String,
    pub dest_tract: String,
    /// Priority as its integer representation.
    pub priority: u8,
    pub payload_size: usize,
    pub payload_type: String,
}

impl EventLogEntry {
    fn from_message(event_id: u64, message: &Message) -> Self {
        Self {
            event_id,
            timestamp_ms: message.timestamp_ms,
            message_id: message.id,
            source_tract: message.source_tract.name().to_string(),
            dest_tract: message.dest_tract.name().to_string(),
            priority: message.priority.as_u8(),
            payload_size: message.payload_size,
            payload_type: message.payload.type_tag().to_string(),
        }
    }
}

/// The event store could not reach its backend. Routing is never aborted on
/// this error; callers log it and carry on with the last known metrics.
#[derive(Debug)]
pub struct EventStoreUnavailable(pub String);

impl fmt::Display for EventStoreUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event store unavailable: {}", self.0)
    }
}

impl std::error::Error for EventStoreUnavailable {}

/// Append-only event log shared by both backends.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Prepare the backend. For the in-memory store this is a no-op; the
    /// durable store loads its stream and metrics sidecar.
    async fn connect(&self) -> Result<(), EventStoreUnavailable>;

    /// Release the backend. Durable metrics are flushed here.
    async fn disconnect(&self);

    /// Append one routed message, returning the new event id. O(1) amortized;
    /// also applies the metric-update rules.
    async fn append(&self, message: &Message) -> Result<u64, EventStoreUnavailable>;

    /// Read up to `count` events with `event_id > start_id`.
    ///
    /// With `block_ms` set and no events immediately available, the call
    /// waits up to that many milliseconds for a new append before returning.
    async fn get_events(
        &self,
        start_id: u64,
        count: usize,
        block_ms: Option<u64>,
    ) -> Vec<EventLogEntry>;

    /// Snapshot of the current metrics.
    async fn get_metrics(&self) -> ConsciousnessMetrics;
}

/// Lazily pulls events from a store in chronological order, optionally
/// bounded by a `[from, to]` timestamp window.
///
/// The projection of the yielded sequence to `message_id` is strictly
/// increasing within the window.
pub struct ReplayCursor<'a> {
    store: &'a dyn EventStore,
    from_ts: Option<i64>,
    to_ts: Option<i64>,
    last_event_id: u64,
    buffer: VecDeque<EventLogEntry>,
    exhausted: bool,
    batch_size: usize,
}

impl<'a> ReplayCursor<'a> {
    pub fn new(store: &'a dyn EventStore, from_ts: Option<i64>, to_ts: Option<i64>) -> Self {
        Self {
            store,
            from_ts,
            to_ts,
            last_event_id: 0,
            buffer: VecDeque::new(),
            exhausted: false,
            batch_size: 1000,
        }
    }

    /// Pull the next in-window event, fetching a new batch when the local
    /// buffer runs dry.
    pub async fn next(&mut self) -> Option<EventLogEntry> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                if let Some(to) = self.to_ts {
                    if entry.timestamp_ms > to {
                        self.exhausted = true;
                        self.buffer.clear();
                        return None;
                    }
                }
                if let Some(from) = self.from_ts {
                    if entry.timestamp_ms < from {
                        continue;
                    }
                }
                return Some(entry);
            }

            if self.exhausted {
                return None;
            }

            let batch = self
                .store
                .get_events(self.last_event_id, self.batch_size, None)
                .await;
            if batch.is_empty() {
                self.exhausted = true;
                return None;
            }
            if batch.len() < self.batch_size {
                self.exhausted = true;
            }
            self.last_event_id = batch.last().map(|e| e.event_id).unwrap_or(self.last_event_id);
            self.buffer.extend(batch);
        }
    }

    /// Drain the remainder of the window into a vector.
    pub async fn collect(mut self) -> Vec<EventLogEntry> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await {
            out.push(entry);
        }
        out
    }
}

struct MemoryState {
    events: VecDeque<EventLogEntry>,
    metrics: ConsciousnessMetrics,
    next_event_id: u64,
}

/// In-memory ring of at most `max_events` entries. Not persistent.
pub struct InMemoryEventStore {
    max_events: usize,
    state: Mutex<MemoryState>,
    appended: Notify,
}

impl InMemoryEventStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            state: Mutex::new(MemoryState {
                events: VecDeque::new(),
                metrics: ConsciousnessMetrics::default(),
                next_event_id: 1,
            }),
            appended: Notify::new(),
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

fn select_events(events: &VecDeque<EventLogEntry>, start_id: u64, count: usize) -> Vec<EventLogEntry> {
    events
        .iter()
        .filter(|e| e.event_id > start_id)
        .take(count)
        .cloned()
        .collect()
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn connect(&self) -> Result<(), EventStoreUnavailable> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn append(&self, message: &Message) -> Result<u64, EventStoreUnavailable> {
        let mut state = self.state.lock().await;
        let event_id = state.next_event_id;
        state.next_event_id += 1;

        state
            .events
            .push_back(EventLogEntry::from_message(event_id, message));
        while state.events.len() > self.max_events {
            state.events.pop_front();
        }
        update_metrics(&mut state.metrics, message);
        drop(state);

        self.appended.notify_waiters();
        Ok(event_id)
    }

    async fn get_events(
        &self,
        start_id: u64,
        count: usize,
        block_ms: Option<u64>,
    ) -> Vec<EventLogEntry> {
        {
            let state = self.state.lock().await;
            let found = select_events(&state.events, start_id, count);
            if !found.is_empty() || block_ms.is_none() {
                return found;
            }
        }

        // Blocking read: wait for one append (or the deadline), then re-read.
        let wait = Duration::from_millis(block_ms.unwrap_or(0));
        let _ = tokio::time::timeout(wait, self.appended.notified()).await;
        let state = self.state.lock().await;
        select_events(&state.events, start_id, count)
    }

    async fn get_metrics(&self) -> ConsciousnessMetrics {
        self.state.lock().await.metrics.clone()
    }
}

/// Reconnection pacing for the durable backend: exponential backoff between
/// failed disk writes, reset on the first success.
struct WriteBackoff {
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
}

impl WriteBackoff {
    const BASE: Duration = Duration::from_millis(250);
    const MAX: Duration = Duration::from_secs(8);

    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            last_attempt: None,
        }
    }

    fn should_attempt(&self) -> bool {
        if self.consecutive_failures == 0 {
            return true;
        }
        let delay = Self::BASE
            .checked_mul(1u32 << self.consecutive_failures.min(5))
            .unwrap_or(Self::MAX)
            .min(Self::MAX);
        self.last_attempt
            .map(|t| t.elapsed() >= delay)
            .unwrap_or(true)
    }

    fn record(&mut self, success: bool) {
        self.last_attempt = Some(Instant::now());
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }
}

struct DurableState {
    events: VecDeque<EventLogEntry>,
    metrics: ConsciousnessMetrics,
    next_event_id: u64,
    backoff: WriteBackoff,
}

/// Durable event store: an append-only `.jsonl` stream plus a metrics
/// sidecar, both keyed by the configured path.
///
/// Trimming is approximate — the stream file is rewritten to the newest
/// `max_stream_length` entries only once it overshoots by a slack margin, so
/// steady-state appends stay O(1).
pub struct DurableEventStore {
    path: PathBuf,
    max_stream_length: usize,
    state: Mutex<DurableState>,
    appended: Notify,
}

impl DurableEventStore {
    /// Default approximate cap on the stream length.
    pub const DEFAULT_MAX_STREAM_LENGTH: usize = 100_000;

    pub fn new(path: impl Into<PathBuf>, max_stream_length: usize) -> Self {
        Self {
            path: path.into(),
            max_stream_length,
            state: Mutex::new(DurableState {
                events: VecDeque::new(),
                metrics: ConsciousnessMetrics::default(),
                next_event_id: 1,
                backoff: WriteBackoff::new(),
            }),
            appended: Notify::new(),
        }
    }

    /// Path of the stream file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn metrics_path(&self) -> PathBuf {
        self.path.with_extension("metrics.json")
    }

    fn load_stream(path: &Path) -> std::io::Result<Vec<EventLogEntry>> {
        let file = fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventLogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("skipping malformed event-log line: {}", e),
            }
        }
        Ok(entries)
    }

    fn append_line(&self, entry: &EventLogEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let json = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{}", json)
    }

    fn write_metrics(&self, metrics: &ConsciousnessMetrics) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(metrics)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(self.metrics_path(), json)
    }

    fn rewrite_stream(&self, events: &VecDeque<EventLogEntry>) -> std::io::Result<()> {
        let mut body = String::new();
        for entry in events {
            body.push_str(&serde_json::to_string(entry).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e)
            })?);
            body.push('\n');
        }
        // Rename-on-write so concurrent readers never see a torn stream.
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)
    }
}

#[async_trait]
impl EventStore for DurableEventStore {
    async fn connect(&self) -> Result<(), EventStoreUnavailable> {
        let mut state = self.state.lock().await;

        if self.path.exists() {
            let entries = Self::load_stream(&self.path)
                .map_err(|e| EventStoreUnavailable(e.to_string()))?;
            state.next_event_id = entries.iter().map(|e| e.event_id).max().unwrap_or(0) + 1;
            state.events = entries.into();
        }

        let metrics_path = self.metrics_path();
        if metrics_path.exists() {
            match fs::read_to_string(&metrics_path) {
                Ok(body) => match serde_json::from_str(&body) {
                    Ok(metrics) => state.metrics = metrics,
                    Err(e) => log::warn!("ignoring malformed metrics sidecar: {}", e),
                },
                Err(e) => log::warn!("failed to read metrics sidecar: {}", e),
            }
        }

        log::info!(
            "durable event store connected ({}, {} events recovered)",
            self.path.display(),
            state.events.len()
        );
        Ok(())
    }

    async fn disconnect(&self) {
        let state = self.state.lock().await;
        if let Err(e) = self.write_metrics(&state.metrics) {
            log::error!("failed to flush metrics on disconnect: {}", e);
        }
    }

    async fn append(&self, message: &Message) -> Result<u64, EventStoreUnavailable> {
        let mut state = self.state.lock().await;
        let event_id = state.next_event_id;
        state.next_event_id += 1;

        let entry = EventLogEntry::from_message(event_id, message);
        state.events.push_back(entry.clone());
        update_metrics(&mut state.metrics, message);

        // Approximate trimming: compact once the overshoot passes 10%.
        let slack = self.max_stream_length / 10;
        let needs_trim = state.events.len() > self.max_stream_length + slack;
        if needs_trim {
            while state.events.len() > self.max_stream_length {
                state.events.pop_front();
            }
        }

        if state.backoff.should_attempt() {
            let write_result = if needs_trim {
                self.rewrite_stream(&state.events)
            } else {
                self.append_line(&entry)
            };
            let io_result = write_result.and_then(|_| self.write_metrics(&state.metrics));

            match io_result {
                Ok(()) => {
                    state.backoff.record(true);
                }
                Err(e) => {
                    state.backoff.record(false);
                    log::error!("failed to persist event {}: {}", event_id, e);
                }
            }
        }
        drop(state);

        self.appended.notify_waiters();
        Ok(event_id)
    }

    async fn get_events(
        &self,
        start_id: u64,
        count: usize,
        block_ms: Option<u64>,
    ) -> Vec<EventLogEntry> {
        {
            let state = self.state.lock().await;
            let found = select_events(&state.events, start_id, count);
            if !found.is_empty() || block_ms.is_none() {
                return found;
            }
        }

        let wait = Duration::from_millis(block_ms.unwrap_or(0));
        let _ = tokio::time::timeout(wait, self.appended.notified()).await;
        let state = self.state.lock().await;
        select_events(&state.events, start_id, count)
    }

    async fn get_metrics(&self) -> ConsciousnessMetrics {
        self.state.lock().await.metrics.clone()
    }
}

/// Create an event store: durable when a path is configured, otherwise the
/// in-memory fallback.
pub fn create_event_store(
    durable_path: Option<PathBuf>,
    force_memory: bool,
) -> Box<dyn EventStore> {
    match durable_path {
        Some(path) if !force_memory => {
            Box::new(DurableEventStore::new(path, DurableEventStore::DEFAULT_MAX_STREAM_LENGTH))
        }
        _ => {
            if force_memory {
                log::info!("event sourcing forced to in-memory backend");
            }
            Box::new(InMemoryEventStore::default())
        }
    }
}
