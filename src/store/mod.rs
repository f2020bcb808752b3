/*!
 * Indexed Store
 * In-memory store of correlated events with secondary indexes
 *
 * Indexes: time, producer, correlation id, function identity. Inserts are
 * O(1) amortized and visible to any query issued after the insert returns.
 * Retention is bounded: oldest events are evicted beyond the configured cap,
 * all indexes stay consistent, and the eviction watermark lets queries flag
 * partially unavailable ranges instead of silently returning less history.
 */

mod query;

pub use query::{IndexChoice, Query, QueryResult, TimeRange};

use crate::core::types::{CorrelationId, EventId, ProducerId};
use crate::correlate::{ChildLink, CorrelatedBatch, CorrelatedEvent, PeerLink};
use crate::event::FunctionKey;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Key ordering every index shares: `(timestamp, event_id)`
type OrderedKey = (u64, EventId);

/// Store health counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub len: usize,
    pub inserted_total: u64,
    pub evicted_total: u64,
    /// Highest timestamp among evicted events; queries reaching at or below
    /// this are partial
    pub evicted_watermark_ns: Option<u64>,
}

/// In-memory correlated-event store with secondary indexes
pub struct IndexedStore {
    max_events: usize,
    events: DashMap<EventId, CorrelatedEvent, RandomState>,
    /// Global time order; doubles as the eviction queue (oldest-first)
    by_time: RwLock<BTreeSet<OrderedKey>>,
    by_correlation: DashMap<CorrelationId, BTreeSet<OrderedKey>, RandomState>,
    by_producer: DashMap<ProducerId, BTreeSet<OrderedKey>, RandomState>,
    by_function: DashMap<FunctionKey, BTreeSet<OrderedKey>, RandomState>,
    inserted: AtomicU64,
    evicted: AtomicU64,
    /// 0 = nothing evicted yet; timestamps are monotonic-clock ns > 0
    evicted_watermark: AtomicU64,
}

impl IndexedStore {
    pub fn new(max_events: usize) -> Self {
        assert!(max_events > 0, "Retention cap must be greater than 0");
        Self {
            max_events,
            events: DashMap::with_hasher(RandomState::new()),
            by_time: RwLock::new(BTreeSet::new()),
            by_correlation: DashMap::with_hasher(RandomState::new()),
            by_producer: DashMap::with_hasher(RandomState::new()),
            by_function: DashMap::with_hasher(RandomState::new()),
            inserted: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            evicted_watermark: AtomicU64::new(0),
        }
    }

    /// Insert one correlated event, updating all secondary indexes
    pub fn insert(&self, correlated: CorrelatedEvent) {
        let key = (correlated.event.timestamp_ns, correlated.event.event_id);

        if let Some(correlation) = &correlated.event.correlation_id {
            self.by_correlation
                .entry(correlation.clone())
                .or_default()
                .insert(key);
        }
        self.by_producer
            .entry(correlated.event.producer_id)
            .or_default()
            .insert(key);
        if let Some(function) = correlated.event.payload.function_key() {
            self.by_function.entry(function).or_default().insert(key);
        }
        self.by_time.write().insert(key);

        self.events.insert(correlated.event.event_id, correlated);
        self.inserted.fetch_add(1, Ordering::Relaxed);

        self.evict_overflow();
    }

    /// Insert a correlated batch: events first, then link updates, so links
    /// targeting events in the same batch always resolve
    pub fn insert_batch(&self, batch: CorrelatedBatch) {
        for correlated in batch.events {
            self.insert(correlated);
        }
        for link in batch.child_links {
            self.apply_child_link(link);
        }
        for link in batch.peer_links {
            self.apply_peer_link(link);
        }
    }

    /// Update a stored event's pairing status (correlator back-patch)
    ///
    /// A link whose target was already evicted is a no-op.
    pub fn apply_peer_link(&self, link: PeerLink) {
        if let Some(mut stored) = self.events.get_mut(&link.event_id) {
            stored.matched_peer = link.peer;
            stored.match_state = link.state;
        }
    }

    /// Record a parent/child causal link on the stored parent
    pub fn apply_child_link(&self, link: ChildLink) {
        if let Some(mut parent) = self.events.get_mut(&link.parent) {
            if !parent.causal_children.contains(&link.child) {
                parent.causal_children.push(link.child);
            }
        }
    }

    /// Apply a set of peer-link updates (sweep output)
    pub fn apply_peer_links(&self, links: Vec<PeerLink>) {
        for link in links {
            self.apply_peer_link(link);
        }
    }

    pub fn get(&self, event_id: EventId) -> Option<CorrelatedEvent> {
        self.events.get(&event_id).map(|e| e.clone())
    }

    /// Entries still awaiting their exit ("open calls")
    pub fn open_calls(&self) -> Vec<CorrelatedEvent> {
        let mut open: Vec<CorrelatedEvent> = self
            .events
            .iter()
            .filter(|e| {
                e.match_state == crate::correlate::MatchState::Open
                    && e.event.kind() == crate::event::EventKind::FunctionEntry
            })
            .map(|e| e.clone())
            .collect();
        open.sort_by_key(|e| (e.event.timestamp_ns, e.event.event_id));
        open
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let watermark = self.evicted_watermark.load(Ordering::Relaxed);
        StoreStats {
            len: self.events.len(),
            inserted_total: self.inserted.load(Ordering::Relaxed),
            evicted_total: self.evicted.load(Ordering::Relaxed),
            evicted_watermark_ns: (watermark > 0).then_some(watermark),
        }
    }

    pub(crate) fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub(crate) fn evicted_watermark_ns(&self) -> u64 {
        self.evicted_watermark.load(Ordering::Relaxed)
    }

    pub(crate) fn time_index(&self) -> &RwLock<BTreeSet<OrderedKey>> {
        &self.by_time
    }

    pub(crate) fn correlation_index(
        &self,
    ) -> &DashMap<CorrelationId, BTreeSet<OrderedKey>, RandomState> {
        &self.by_correlation
    }

    pub(crate) fn producer_index(&self) -> &DashMap<ProducerId, BTreeSet<OrderedKey>, RandomState> {
        &self.by_producer
    }

    pub(crate) fn function_index(&self) -> &DashMap<FunctionKey, BTreeSet<OrderedKey>, RandomState> {
        &self.by_function
    }

    /// Evict oldest events until the store is back under its cap
    fn evict_overflow(&self) {
        while self.events.len() > self.max_events {
            let oldest = {
                let mut by_time = self.by_time.write();
                match by_time.iter().next().copied() {
                    Some(key) => {
                        by_time.remove(&key);
                        key
                    }
                    None => return,
                }
            };
            self.remove_indexed(oldest);
        }
    }

    /// Remove one event and its index entries; records the watermark
    fn remove_indexed(&self, key: OrderedKey) {
        let (timestamp_ns, event_id) = key;
        let Some((_, removed)) = self.events.remove(&event_id) else {
            return;
        };

        if let Some(correlation) = &removed.event.correlation_id {
            if let Some(mut set) = self.by_correlation.get_mut(correlation) {
                set.remove(&key);
                let empty = set.is_empty();
                drop(set);
                if empty {
                    self.by_correlation
                        .remove_if(correlation, |_, set| set.is_empty());
                }
            }
        }
        if let Some(mut set) = self.by_producer.get_mut(&removed.event.producer_id) {
            set.remove(&key);
        }
        if let Some(function) = removed.event.payload.function_key() {
            if let Some(mut set) = self.by_function.get_mut(&function) {
                set.remove(&key);
            }
        }

        self.evicted.fetch_add(1, Ordering::Relaxed);
        self.evicted_watermark
            .fetch_max(timestamp_ns, Ordering::Relaxed);
    }
}
