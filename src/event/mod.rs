/*!
 * Event Model
 * Strongly-typed capture events with bounded payloads
 *
 * Every pipeline stage exchanges this record. Events are immutable once
 * created; only the correlator's derived links (see `correlate`) mutate
 * after the fact, and never the event itself.
 */

mod context;

pub use context::{CorrelationContext, Scope};

use crate::core::types::{
    monotonic_ns, CallId, CorrelationId, EventId, InlineString, MessageId, ProducerId,
};
use serde::{Deserialize, Serialize};

/// Fieldless discriminant of `Payload`, used for filtering and indexing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    FunctionEntry,
    FunctionExit,
    StateChange,
    MessageSend,
    MessageReceive,
    ProcessSpawn,
    ProcessExit,
    Error,
}

/// A captured payload value, truncated to the configured byte cap
///
/// Truncation is total: an oversize payload is clipped and marked, never
/// rejected. Truncating a payload already under the cap is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub truncated: bool,
    pub original_size: usize,
}

impl Captured {
    /// Capture raw bytes under a byte cap
    #[inline]
    pub fn capture(mut bytes: Vec<u8>, cap: usize) -> Self {
        let original_size = bytes.len();
        if original_size <= cap {
            Self {
                bytes,
                truncated: false,
                original_size,
            }
        } else {
            bytes.truncate(cap);
            Self {
                bytes,
                truncated: true,
                original_size,
            }
        }
    }

    /// Capture a JSON value (arguments, return values, state snapshots)
    ///
    /// Serialization failure degrades to capturing the error text; payload
    /// capture never fails the pipeline.
    pub fn from_value(value: &serde_json::Value, cap: usize) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => Self::capture(bytes, cap),
            Err(e) => Self::capture(e.to_string().into_bytes(), cap),
        }
    }

    /// Empty payload
    #[inline]
    pub fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            truncated: false,
            original_size: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Module + function identity for the function index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionKey {
    pub module: InlineString,
    pub function: InlineString,
}

impl FunctionKey {
    #[inline]
    pub fn new(module: impl Into<InlineString>, function: impl Into<InlineString>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
        }
    }
}

/// Event payload - strongly typed variants for each event kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    FunctionEntry {
        module: InlineString,
        function: InlineString,
        args: Captured,
    },
    FunctionExit {
        module: InlineString,
        function: InlineString,
        return_value: Captured,
    },
    StateChange {
        subject: InlineString,
        old: Captured,
        new: Captured,
    },
    MessageSend {
        message_id: MessageId,
        to: Option<ProducerId>,
        body: Captured,
    },
    MessageReceive {
        message_id: MessageId,
        from: Option<ProducerId>,
        body: Captured,
    },
    ProcessSpawn {
        parent: Option<ProducerId>,
        name: InlineString,
    },
    ProcessExit {
        reason: InlineString,
    },
    Error {
        message: InlineString,
        context: Captured,
    },
}

impl Payload {
    /// Discriminant for filtering
    #[inline]
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::FunctionEntry { .. } => EventKind::FunctionEntry,
            Payload::FunctionExit { .. } => EventKind::FunctionExit,
            Payload::StateChange { .. } => EventKind::StateChange,
            Payload::MessageSend { .. } => EventKind::MessageSend,
            Payload::MessageReceive { .. } => EventKind::MessageReceive,
            Payload::ProcessSpawn { .. } => EventKind::ProcessSpawn,
            Payload::ProcessExit { .. } => EventKind::ProcessExit,
            Payload::Error { .. } => EventKind::Error,
        }
    }

    /// Function identity, for entry/exit events
    pub fn function_key(&self) -> Option<FunctionKey> {
        match self {
            Payload::FunctionEntry {
                module, function, ..
            }
            | Payload::FunctionExit {
                module, function, ..
            } => Some(FunctionKey {
                module: module.clone(),
                function: function.clone(),
            }),
            _ => None,
        }
    }

    /// Message identity, for send/receive events
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Payload::MessageSend { message_id, .. }
            | Payload::MessageReceive { message_id, .. } => Some(message_id),
            _ => None,
        }
    }
}

/// Raw capture event - immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique id; strictly increasing per producer
    pub event_id: EventId,
    /// Monotonic timestamp (nanoseconds, process-local clock)
    pub timestamp_ns: u64,
    /// Execution unit that emitted the event
    pub producer_id: ProducerId,
    /// Logical operation this event belongs to
    pub correlation_id: Option<CorrelationId>,
    /// Invocation identity (entry/exit pairing)
    pub call_id: Option<CallId>,
    /// Invocation that caused this one, if nested
    pub parent_call_id: Option<CallId>,
    /// Variant-specific data
    pub payload: Payload,
}

impl Event {
    /// Create a new event with the current monotonic timestamp
    #[inline]
    pub fn new(event_id: EventId, producer_id: ProducerId, payload: Payload) -> Self {
        Self {
            event_id,
            timestamp_ns: monotonic_ns(),
            producer_id,
            correlation_id: None,
            call_id: None,
            parent_call_id: None,
            payload,
        }
    }

    #[inline]
    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    #[inline]
    pub fn with_call(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }

    #[inline]
    pub fn with_parent(mut self, parent_call_id: Option<CallId>) -> Self {
        self.parent_call_id = parent_call_id;
        self
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
