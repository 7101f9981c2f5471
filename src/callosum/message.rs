//! Cross-tract message model.
//!
//! The substrate routes immutable [`Message`]s between two logical domains,
//! the Internal tract (planning, reflection) and the External tract
//! (environmental actuation). A message records where it came from, where it
//! is going, how urgent it is, and an opaque [`MessagePayload`].
//!
//! Message ids are issued by the [`CorpusCallosum`](crate::CorpusCallosum)
//! under its own lock; they are monotonically increasing within a process but
//! need not be contiguous across routing failures.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::callosum::task::TaskEnvelope;

/// One of the two logical domains between which messages are routed.
///
/// # Example
///
/// ```rust
/// use callosum::TractType;
///
/// let t = TractType::Internal;
/// // Tracts serialize by name for event-log records and persisted state.
/// assert_eq!(serde_json::to_string(&t).unwrap(), "\"Internal\"");
/// assert_eq!(t.opposite(), TractType::External);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TractType {
    /// T_int: self-referential processing (planning, reflection).
    Internal,
    /// T_ext: environmental interaction (actuation, particles).
    External,
}

impl TractType {
    /// The other tract.
    pub fn opposite(self) -> TractType {
        match self {
            TractType::Internal => TractType::External,
            TractType::External => TractType::Internal,
        }
    }

    /// Symbolic name used in event-log records.
    pub fn name(self) -> &'static str {
        match self {
            TractType::Internal => "Internal",
            TractType::External => "External",
        }
    }
}

impl fmt::Display for TractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scheduling priority of a message. Higher numeric value = more urgent.
///
/// Priorities form a total order and serialize as integers when embedded in
/// messages and event-log records.
///
/// # Example
///
/// ```rust
/// use callosum::MessagePriority;
///
/// assert!(MessagePriority::Critical > MessagePriority::Low);
/// assert_eq!(MessagePriority::Normal.as_u8(), 2);
/// assert_eq!(MessagePriority::from_u8(4), Some(MessagePriority::Urgent));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MessagePriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
    Critical = 5,
}

impl MessagePriority {
    /// Integer representation used on the wire and in event-log records.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse the integer representation back into a priority.
    pub fn from_u8(value: u8) -> Option<MessagePriority> {
        match value {
            1 => Some(MessagePriority::Low),
            2 => Some(MessagePriority::Normal),
            3 => Some(MessagePriority::High),
            4 => Some(MessagePriority::Urgent),
            5 => Some(MessagePriority::Critical),
            _ => None,
        }
    }

    /// Map an orchestrator task priority (1..=10 scale) into a message
    /// priority band.
    pub fn from_task_priority(priority: u8) -> MessagePriority {
        match priority {
            0..=2 => MessagePriority::Low,
            3..=5 => MessagePriority::Normal,
            6..=7 => MessagePriority::High,
            8..=9 => MessagePriority::Urgent,
            _ => MessagePriority::Critical,
        }
    }
}

/// Control signals that can cross the bridge outside of task traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// Ask consumers to flush any buffered state.
    Flush,
    /// Cooperative shutdown announcement.
    Shutdown,
}

/// Opaque payload carried by a [`Message`].
///
/// Orchestrator-bound traffic uses [`MessagePayload::Task`], which carries a
/// task descriptor plus a handle back into the originating orchestrator's
/// result store. Free-form traffic uses [`MessagePayload::Json`] or
/// [`MessagePayload::Raw`].
#[derive(Debug, Clone)]
pub enum MessagePayload {
    /// A task envelope: the unit of orchestrator request/response traffic.
    Task(TaskEnvelope),
    /// Arbitrary structured data.
    Json(Value),
    /// Uninterpreted bytes.
    Raw(Vec<u8>),
    /// Out-of-band control signal.
    Control(ControlSignal),
}

impl MessagePayload {
    /// Short tag recorded in event-log entries (payload bodies are never
    /// persisted by the core).
    pub fn type_tag(&self) -> &'static str {
        match self {
            MessagePayload::Task(_) => "task",
            MessagePayload::Json(_) => "json",
            MessagePayload::Raw(_) => "raw",
            MessagePayload::Control(_) => "control",
        }
    }

    /// Borrow the task envelope, if this payload carries one.
    pub fn as_task(&self) -> Option<&TaskEnvelope> {
        match self {
            MessagePayload::Task(envelope) => Some(envelope),
            _ => None,
        }
    }
}

impl From<Value> for MessagePayload {
    fn from(value: Value) -> Self {
        MessagePayload::Json(value)
    }
}

/// An immutable cross-tract message.
///
/// Construction is the sole mutator: once built, a message is only moved or
/// cloned, never edited. Ownership follows delivery — the stream buffers the
/// message until exactly one subscriber accepts it, after which the
/// subscriber owns it.
#[derive(Debug, Clone)]
pub struct Message {
    /// Monotonically assigned id (unique within a process).
    pub id: i64,
    /// Tract the producer belongs to.
    pub source_tract: TractType,
    /// Tract the message is routed to.
    pub dest_tract: TractType,
    /// Scheduling priority.
    pub priority: MessagePriority,
    /// Milliseconds since the Unix epoch at construction time.
    pub timestamp_ms: i64,
    /// Size hint for the payload, in bytes.
    pub payload_size: usize,
    /// The payload itself.
    pub payload: MessagePayload,
}

impl Message {
    /// True when the message crosses from one tract to the other.
    ///
    /// Self-addressed messages (source == dest) are legal; they count toward
    /// total traffic but not toward dialogue balance.
    pub fn is_cross_tract(&self) -> bool {
        self.source_tract != self.dest_tract
    }
}

/// Aggregate routing statistics kept by the [`CorpusCallosum`](crate::CorpusCallosum).
///
/// `total_messages + message_loss_count` accounts for every `route_message`
/// call: a call either lands in a stream (counted in `total_messages`) or is
/// refused (buffer full or circuit open, counted in `message_loss_count`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStats {
    /// Messages successfully published to a tract stream.
    pub total_messages: u64,
    /// Messages routed to the Internal tract.
    pub messages_to_internal: u64,
    /// Messages routed to the External tract.
    pub messages_to_external: u64,
    /// High-water mark of any stream's pending buffer.
    pub peak_queue_depth: usize,
    /// Messages refused (buffer full or circuit open).
    pub message_loss_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_round_trips_through_integers() {
        for p in [
            MessagePriority::Low,
            MessagePriority::Normal,
            MessagePriority::High,
            MessagePriority::Urgent,
            MessagePriority::Critical,
        ]
        .iter()
        {
            assert_eq!(MessagePriority::from_u8(p.as_u8()), Some(*p));
        }
        assert_eq!(MessagePriority::from_u8(0), None);
        assert_eq!(MessagePriority::from_u8(6), None);
    }

    #[test]
    fn task_priority_bands() {
        assert_eq!(
            MessagePriority::from_task_priority(1),
            MessagePriority::Low
        );
        assert_eq!(
            MessagePriority::from_task_priority(5),
            MessagePriority::Normal
        );
        assert_eq!(
            MessagePriority::from_task_priority(8),
            MessagePriority::Urgent
        );
        assert_eq!(
            MessagePriority::from_task_priority(10),
            MessagePriority::Critical
        );
    }

    #[test]
    fn payload_type_tags() {
        assert_eq!(
            MessagePayload::Json(serde_json::json!({"k": 1})).type_tag(),
            "json"
        );
        assert_eq!(MessagePayload::Raw(vec![1, 2, 3]).type_tag(), "raw");
        assert_eq!(
            MessagePayload::Control(ControlSignal::Flush).type_tag(),
            "control"
        );
    }
}
