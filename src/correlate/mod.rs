/*!
 * Event Correlator
 * Derives causal structure from the raw per-producer-ordered event stream
 *
 * State is sharded by correlation id so one logical operation's events never
 * split across shards; each shard is mutated by exactly one consumer at a
 * time. Correlation never blocks the pipeline: an event whose causal partner
 * is missing is flushed flagged-but-valid, and pending state is bounded by a
 * TTL sweep plus producer-exit finalization.
 */

use crate::core::types::{CallId, EventId, MessageId, ProducerId};
use crate::event::{Event, Payload};
use ahash::RandomState;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Pairing status of a correlated event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchState {
    /// Event kind has no causal partner (state change, spawn, error)
    Solo,
    /// Awaiting its partner (entry without exit yet, send without receive)
    Open,
    /// Partner observed; `matched_peer` holds its event id
    Matched,
    /// Partner will never be observed; flagged, not an error
    Unmatched(UnmatchedKind),
}

/// Why a causal pair never closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnmatchedKind {
    /// Exit arrived with no recorded entry (e.g. the entry was dropped)
    MissingEntry,
    /// Receive arrived with no recorded send
    MissingSend,
    /// Entry whose producer terminated or whose exit never arrived in time
    NeverReturned,
    /// Send whose receive never arrived in time
    NeverReceived,
}

/// Correlator output: an event plus derived causal links
///
/// Mutated only while the causal pair is still open (via link updates
/// applied by the store), then frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedEvent {
    pub event: Event,
    /// The paired exit/receive (or entry/send) event id, once known
    pub matched_peer: Option<EventId>,
    /// Events whose `parent_call_id` references this one
    pub causal_children: Vec<EventId>,
    pub match_state: MatchState,
}

impl CorrelatedEvent {
    fn solo(event: Event) -> Self {
        Self {
            event,
            matched_peer: None,
            causal_children: Vec::new(),
            match_state: MatchState::Solo,
        }
    }

    fn open(event: Event) -> Self {
        Self {
            match_state: MatchState::Open,
            ..Self::solo(event)
        }
    }

    fn matched(event: Event, peer: EventId) -> Self {
        Self {
            matched_peer: Some(peer),
            match_state: MatchState::Matched,
            ..Self::solo(event)
        }
    }

    fn unmatched(event: Event, kind: UnmatchedKind) -> Self {
        Self {
            match_state: MatchState::Unmatched(kind),
            ..Self::solo(event)
        }
    }
}

/// Deferred mutation of an already-stored event's pairing status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLink {
    pub event_id: EventId,
    pub peer: Option<EventId>,
    pub state: MatchState,
}

/// Deferred parent/child causal link between stored events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLink {
    pub parent: EventId,
    pub child: EventId,
}

/// One correlated batch: fresh events plus link updates for earlier ones
#[derive(Debug, Default)]
pub struct CorrelatedBatch {
    pub events: Vec<CorrelatedEvent>,
    pub peer_links: Vec<PeerLink>,
    pub child_links: Vec<ChildLink>,
}

/// Correlator health counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelatorStats {
    pub pending_calls: usize,
    pub pending_messages: usize,
    pub matched_calls: u64,
    pub matched_messages: u64,
    pub unmatched_events: u64,
}

struct PendingCall {
    event_id: EventId,
    producer: ProducerId,
    inserted_at_ns: u64,
}

struct PendingSend {
    event_id: EventId,
    producer: ProducerId,
    inserted_at_ns: u64,
}

struct CallIndexEntry {
    event_id: EventId,
    producer: ProducerId,
    inserted_at_ns: u64,
}

#[derive(Default)]
struct Shard {
    pending_calls: HashMap<CallId, PendingCall, RandomState>,
    pending_messages: HashMap<MessageId, PendingSend, RandomState>,
    /// call id -> entry event id, kept past matching so late-arriving
    /// children can still link to their parent; expired by the sweep
    call_index: HashMap<CallId, CallIndexEntry, RandomState>,
}

/// Stateful causal-correlation engine
pub struct Correlator {
    shards: Vec<Mutex<Shard>>,
    hasher: RandomState,
    matched_calls: AtomicU64,
    matched_messages: AtomicU64,
    unmatched_events: AtomicU64,
}

impl Correlator {
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "Correlator requires at least one shard");
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::default())).collect(),
            hasher: RandomState::new(),
            matched_calls: AtomicU64::new(0),
            matched_messages: AtomicU64::new(0),
            unmatched_events: AtomicU64::new(0),
        }
    }

    /// Correlate one drained batch
    ///
    /// Per-producer order within the batch is preserved by the ring, so an
    /// entry is always processed before its own exit when both survived.
    pub fn correlate_batch(&self, batch: Vec<Event>) -> CorrelatedBatch {
        let mut out = CorrelatedBatch::default();
        for event in batch {
            self.correlate_one(event, &mut out);
        }
        out
    }

    /// Flush pending pairs older than `ttl` as unmatched
    ///
    /// Bounds correlator memory; returns link updates for the store.
    pub fn sweep_expired(&self, ttl: Duration) -> Vec<PeerLink> {
        let now = crate::core::types::monotonic_ns();
        let ttl_ns = ttl.as_nanos() as u64;
        let mut links = Vec::new();

        for shard in &self.shards {
            let mut shard = shard.lock();
            let expired: Vec<CallId> = shard
                .pending_calls
                .iter()
                .filter(|(_, p)| now.saturating_sub(p.inserted_at_ns) > ttl_ns)
                .map(|(id, _)| *id)
                .collect();
            for call_id in expired {
                if let Some(pending) = shard.pending_calls.remove(&call_id) {
                    links.push(PeerLink {
                        event_id: pending.event_id,
                        peer: None,
                        state: MatchState::Unmatched(UnmatchedKind::NeverReturned),
                    });
                }
            }

            let expired: Vec<MessageId> = shard
                .pending_messages
                .iter()
                .filter(|(_, p)| now.saturating_sub(p.inserted_at_ns) > ttl_ns)
                .map(|(id, _)| id.clone())
                .collect();
            for message_id in expired {
                if let Some(pending) = shard.pending_messages.remove(&message_id) {
                    links.push(PeerLink {
                        event_id: pending.event_id,
                        peer: None,
                        state: MatchState::Unmatched(UnmatchedKind::NeverReceived),
                    });
                }
            }

            shard
                .call_index
                .retain(|_, entry| now.saturating_sub(entry.inserted_at_ns) <= ttl_ns);
        }

        if !links.is_empty() {
            self.unmatched_events
                .fetch_add(links.len() as u64, Ordering::Relaxed);
            debug!(expired = links.len(), "flushed expired pending pairs");
        }
        links
    }

    pub fn stats(&self) -> CorrelatorStats {
        let mut pending_calls = 0;
        let mut pending_messages = 0;
        for shard in &self.shards {
            let shard = shard.lock();
            pending_calls += shard.pending_calls.len();
            pending_messages += shard.pending_messages.len();
        }
        CorrelatorStats {
            pending_calls,
            pending_messages,
            matched_calls: self.matched_calls.load(Ordering::Relaxed),
            matched_messages: self.matched_messages.load(Ordering::Relaxed),
            unmatched_events: self.unmatched_events.load(Ordering::Relaxed),
        }
    }

    fn correlate_one(&self, event: Event, out: &mut CorrelatedBatch) {
        match event.kind() {
            crate::event::EventKind::FunctionEntry => self.on_entry(event, out),
            crate::event::EventKind::FunctionExit => self.on_exit(event, out),
            crate::event::EventKind::MessageSend => self.on_send(event, out),
            crate::event::EventKind::MessageReceive => self.on_receive(event, out),
            crate::event::EventKind::ProcessExit => {
                let producer = event.producer_id;
                out.events.push(CorrelatedEvent::solo(event));
                self.finalize_producer(producer, out);
            }
            _ => out.events.push(CorrelatedEvent::solo(event)),
        }
    }

    fn on_entry(&self, event: Event, out: &mut CorrelatedBatch) {
        let Some(call_id) = event.call_id else {
            out.events.push(CorrelatedEvent::solo(event));
            return;
        };
        let now = event.timestamp_ns;
        let shard_idx = self.shard_for(&event);
        let mut shard = self.shards[shard_idx].lock();

        if let Some(parent_call) = event.parent_call_id {
            if let Some(parent) = shard.call_index.get(&parent_call) {
                out.child_links.push(ChildLink {
                    parent: parent.event_id,
                    child: event.event_id,
                });
            }
        }

        shard.pending_calls.insert(
            call_id,
            PendingCall {
                event_id: event.event_id,
                producer: event.producer_id,
                inserted_at_ns: now,
            },
        );
        shard.call_index.insert(
            call_id,
            CallIndexEntry {
                event_id: event.event_id,
                producer: event.producer_id,
                inserted_at_ns: now,
            },
        );
        drop(shard);
        out.events.push(CorrelatedEvent::open(event));
    }

    fn on_exit(&self, event: Event, out: &mut CorrelatedBatch) {
        let shard_idx = self.shard_for(&event);
        let pending = {
            let mut shard = self.shards[shard_idx].lock();
            event.call_id.and_then(|c| shard.pending_calls.remove(&c))
        };
        match pending {
            Some(pending) => {
                self.matched_calls.fetch_add(1, Ordering::Relaxed);
                out.peer_links.push(PeerLink {
                    event_id: pending.event_id,
                    peer: Some(event.event_id),
                    state: MatchState::Matched,
                });
                let peer = pending.event_id;
                out.events.push(CorrelatedEvent::matched(event, peer));
            }
            None => {
                // Exit without a recorded entry (buffer drop upstream):
                // flagged, queryable, never an error
                self.unmatched_events.fetch_add(1, Ordering::Relaxed);
                out.events
                    .push(CorrelatedEvent::unmatched(event, UnmatchedKind::MissingEntry));
            }
        }
    }

    fn on_send(&self, event: Event, out: &mut CorrelatedBatch) {
        let Some(message_id) = event.payload.message_id().cloned() else {
            out.events.push(CorrelatedEvent::solo(event));
            return;
        };
        let shard_idx = self.shard_for(&event);
        self.shards[shard_idx].lock().pending_messages.insert(
            message_id,
            PendingSend {
                event_id: event.event_id,
                producer: event.producer_id,
                inserted_at_ns: event.timestamp_ns,
            },
        );
        out.events.push(CorrelatedEvent::open(event));
    }

    fn on_receive(&self, event: Event, out: &mut CorrelatedBatch) {
        let shard_idx = self.shard_for(&event);
        let pending = {
            let mut shard = self.shards[shard_idx].lock();
            event
                .payload
                .message_id()
                .and_then(|id| shard.pending_messages.remove(id))
        };
        match pending {
            Some(pending) => {
                self.matched_messages.fetch_add(1, Ordering::Relaxed);
                out.peer_links.push(PeerLink {
                    event_id: pending.event_id,
                    peer: Some(event.event_id),
                    state: MatchState::Matched,
                });
                let peer = pending.event_id;
                out.events.push(CorrelatedEvent::matched(event, peer));
            }
            None => {
                self.unmatched_events.fetch_add(1, Ordering::Relaxed);
                out.events
                    .push(CorrelatedEvent::unmatched(event, UnmatchedKind::MissingSend));
            }
        }
    }

    /// Finalize all pending pairs of a terminated producer as unmatched
    fn finalize_producer(&self, producer: ProducerId, out: &mut CorrelatedBatch) {
        let mut finalized = 0u64;
        for shard in &self.shards {
            let mut shard = shard.lock();

            let dead: Vec<CallId> = shard
                .pending_calls
                .iter()
                .filter(|(_, p)| p.producer == producer)
                .map(|(id, _)| *id)
                .collect();
            for call_id in dead {
                if let Some(pending) = shard.pending_calls.remove(&call_id) {
                    out.peer_links.push(PeerLink {
                        event_id: pending.event_id,
                        peer: None,
                        state: MatchState::Unmatched(UnmatchedKind::NeverReturned),
                    });
                    finalized += 1;
                }
            }

            let dead: Vec<MessageId> = shard
                .pending_messages
                .iter()
                .filter(|(_, p)| p.producer == producer)
                .map(|(id, _)| id.clone())
                .collect();
            for message_id in dead {
                if let Some(pending) = shard.pending_messages.remove(&message_id) {
                    out.peer_links.push(PeerLink {
                        event_id: pending.event_id,
                        peer: None,
                        state: MatchState::Unmatched(UnmatchedKind::NeverReceived),
                    });
                    finalized += 1;
                }
            }

            shard.call_index.retain(|_, entry| entry.producer != producer);
        }
        if finalized > 0 {
            self.unmatched_events.fetch_add(finalized, Ordering::Relaxed);
            debug!(%producer, finalized, "finalized pending pairs for exited producer");
        }
    }

    /// Shard by correlation id so one operation never splits across shards;
    /// uncorrelated events shard by producer
    fn shard_for(&self, event: &Event) -> usize {
        let mut hasher = self.hasher.build_hasher();
        match &event.correlation_id {
            Some(correlation) => correlation.hash(&mut hasher),
            None => event.producer_id.hash(&mut hasher),
        }
        (hasher.finish() as usize) % self.shards.len()
    }
}
