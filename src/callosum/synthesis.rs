//! Windowed emergence detection over recent cross-tract traffic.
//!
//! The [`PatternSynthesizer`] watches the last few thousand routed messages
//! and looks for the statistical signature of balanced dialogue: within a
//! recent window, both directions carry material traffic and their counts are
//! close in magnitude. When found, it emits a [`EmergenceEvent`] with the
//! balance ratio as confidence.

use chrono::Utc;

use crate::callosum::message::{Message, TractType};

/// Messages kept in the rolling history.
pub const DEFAULT_HISTORY_SIZE: usize = 10_000;
/// Window examined by each emergence check.
pub const DEFAULT_WINDOW_SIZE: usize = 100;
/// Minimum per-direction count within the window.
const MIN_DIRECTIONAL_COUNT: usize = 10;
/// Balance ratio the window must exceed.
const WINDOW_BALANCE_THRESHOLD: f64 = 0.7;
/// Cap on retained emitted events.
const MAX_EMERGENCE_EVENTS: usize = 1000;

/// A detected emergence signature.
#[derive(Debug, Clone, PartialEq)]
pub struct EmergenceEvent {
    pub timestamp_ms: i64,
    /// Pattern discriminator; currently always `"balanced_dialogue"`.
    pub pattern_type: String,
    pub source_tract: TractType,
    pub dest_tract: TractType,
    /// The window's balance ratio, in (0.7, 1.0].
    pub confidence: f64,
    pub description: String,
}

/// Lightweight projection of a message kept in the history ring.
#[derive(Debug, Clone, Copy)]
struct TrafficSample {
    source_tract: TractType,
    dest_tract: TractType,
}

/// Detects emergent patterns in cross-tract dialogue.
pub struct PatternSynthesizer {
    history: Vec<TrafficSample>,
    max_history_size: usize,
    emergence_events: Vec<EmergenceEvent>,
}

impl Default for PatternSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl PatternSynthesizer {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            history: Vec::new(),
            max_history_size,
            emergence_events: Vec::new(),
        }
    }

    /// Record one routed message, trimming the history from the front when
    /// it outgrows the configured bound.
    pub fn add_event(&mut self, message: &Message) {
        self.history.push(TrafficSample {
            source_tract: message.source_tract,
            dest_tract: message.dest_tract,
        });
        if self.history.len() > self.max_history_size {
            let excess = self.history.len() - self.max_history_size;
            self.history.drain(..excess);
        }
    }

    /// Examine the last `window_size` messages for a balanced-dialogue
    /// signature. Emits and returns the event when one is found.
    pub fn detect_emergence(&mut self, window_size: usize) -> Option<EmergenceEvent> {
        if self.history.len() < window_size {
            return None;
        }

        let recent = &self.history[self.history.len() - window_size..];
        let i2e = recent
            .iter()
            .filter(|s| {
                s.source_tract == TractType::Internal && s.dest_tract == TractType::External
            })
            .count();
        let e2i = recent
            .iter()
            .filter(|s| {
                s.source_tract == TractType::External && s.dest_tract == TractType::Internal
            })
            .count();

        if i2e <= MIN_DIRECTIONAL_COUNT || e2i <= MIN_DIRECTIONAL_COUNT {
            return None;
        }

        let balance = (i2e.min(e2i) as f64) / (i2e.max(e2i) as f64);
        if balance <= WINDOW_BALANCE_THRESHOLD {
            return None;
        }

        let event = EmergenceEvent {
            timestamp_ms: Utc::now().timestamp_millis(),
            pattern_type: "balanced_dialogue".to_string(),
            source_tract: TractType::Internal,
            dest_tract: TractType::External,
            confidence: balance,
            description: format!("balanced cross-tract dialogue detected: {}<->{}", i2e, e2i),
        };

        self.emergence_events.push(event.clone());
        if self.emergence_events.len() > MAX_EMERGENCE_EVENTS {
            let excess = self.emergence_events.len() - MAX_EMERGENCE_EVENTS;
            self.emergence_events.drain(..excess);
        }
        Some(event)
    }

    /// Snapshot of every retained emergence event, oldest first.
    pub fn emergence_events(&self) -> Vec<EmergenceEvent> {
        self.emergence_events.clone()
    }

    /// Number of messages currently in the rolling history.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
