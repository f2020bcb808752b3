/*!
 * Core Types
 * Type-safe identifiers shared by every pipeline stage
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Inline-optimized string for short identifiers (module names, correlation ids)
///
/// Strings up to 23 bytes are stored without heap allocation; longer strings
/// fall back to a regular heap string.
pub type InlineString = smartstring::alias::String;

/// Opaque identifier of the execution unit that emitted an event
///
/// A "producer" is whatever lightweight concurrency unit the traced system
/// uses (thread, task, actor). The engine only requires that one producer
/// never interleaves its own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(pub u32);

/// Identifier unique to a single function invocation
///
/// Pairs a `FunctionEntry` with its `FunctionExit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

/// Identifier shared by all events belonging to one logical operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub InlineString);

/// Caller-supplied identity pairing a `MessageSend` with its `MessageReceive`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub InlineString);

/// Globally unique event identifier
///
/// Combines the producer with a per-producer monotonically increasing
/// sequence number. `Ord` is `(producer, seq)`, so per-producer ordering is
/// strict while cross-producer ordering is only a tie-breaker for events
/// sharing a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub producer: ProducerId,
    pub seq: u64,
}

impl EventId {
    /// Smallest possible event id (range-scan lower bound)
    pub const MIN: EventId = EventId {
        producer: ProducerId(u32::MIN),
        seq: u64::MIN,
    };

    /// Largest possible event id (range-scan upper bound)
    pub const MAX: EventId = EventId {
        producer: ProducerId(u32::MAX),
        seq: u64::MAX,
    };

    #[inline]
    pub const fn new(producer: ProducerId, seq: u64) -> Self {
        Self { producer, seq }
    }
}

impl CorrelationId {
    #[inline]
    pub fn new(id: impl Into<InlineString>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh correlation id for an operation with no enclosing scope
    #[inline]
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string().into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl MessageId {
    #[inline]
    pub fn new(id: impl Into<InlineString>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.producer, self.seq)
    }
}

/// Current time in nanoseconds on a process-wide monotonic clock
///
/// Not wall-clock. Values are only comparable within one capture process;
/// cross-producer ordering uses `EventId` as the tie-breaker.
#[inline]
pub fn monotonic_ns() -> u64 {
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_ordering() {
        let a = EventId::new(ProducerId(1), 10);
        let b = EventId::new(ProducerId(1), 11);
        let c = EventId::new(ProducerId(2), 0);

        assert!(a < b);
        assert!(b < c);
        assert!(EventId::MIN < a);
        assert!(c < EventId::MAX);
    }

    #[test]
    fn test_fresh_correlation_ids_are_unique() {
        let a = CorrelationId::fresh();
        let b = CorrelationId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let t1 = monotonic_ns();
        let t2 = monotonic_ns();
        assert!(t2 >= t1);
    }
}
