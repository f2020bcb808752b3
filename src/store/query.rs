/*!
 * Query Engine
 * Filtered retrieval over the indexed store
 *
 * A query is a conjunction of optional predicates. The engine picks the most
 * selective available index (correlation id > producer > function > time
 * range > full scan), applies the remaining predicates as a post-filter, and
 * returns results ordered by `(timestamp, event_id)`.
 */

use super::IndexedStore;
use crate::core::types::{CorrelationId, EventId, ProducerId};
use crate::correlate::CorrelatedEvent;
use crate::event::{EventKind, FunctionKey};
use serde::{Deserialize, Serialize};

/// Inclusive time range in monotonic nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl TimeRange {
    #[inline]
    pub fn new(start_ns: u64, end_ns: u64) -> Self {
        Self { start_ns, end_ns }
    }

    #[inline]
    pub fn contains(&self, timestamp_ns: u64) -> bool {
        timestamp_ns >= self.start_ns && timestamp_ns <= self.end_ns
    }
}

/// Which access path the engine chose for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexChoice {
    Correlation,
    Producer,
    Function,
    TimeRange,
    FullScan,
}

/// Query result with an explicit partial-history indicator
///
/// `partial` is true when eviction may have removed events the filter would
/// otherwise have matched - never a silent empty result indistinguishable
/// from "nothing happened".
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub events: Vec<CorrelatedEvent>,
    pub count: usize,
    pub partial: bool,
}

/// Query builder for fluent filter construction
#[derive(Debug, Clone, Default)]
pub struct Query {
    time_range: Option<TimeRange>,
    producer: Option<ProducerId>,
    correlation: Option<CorrelationId>,
    function: Option<FunctionKey>,
    kind: Option<EventKind>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_range(mut self, start_ns: u64, end_ns: u64) -> Self {
        self.time_range = Some(TimeRange::new(start_ns, end_ns));
        self
    }

    pub fn producer(mut self, producer: ProducerId) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn correlation(mut self, correlation: CorrelationId) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn function(mut self, function: FunctionKey) -> Self {
        self.function = Some(function);
        self
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Index the engine will use, by selectivity precedence
    pub fn plan(&self) -> IndexChoice {
        if self.correlation.is_some() {
            IndexChoice::Correlation
        } else if self.producer.is_some() {
            IndexChoice::Producer
        } else if self.function.is_some() {
            IndexChoice::Function
        } else if self.time_range.is_some() {
            IndexChoice::TimeRange
        } else {
            IndexChoice::FullScan
        }
    }

    /// Check every predicate against a stored event (post-filter)
    fn matches(&self, correlated: &CorrelatedEvent) -> bool {
        let event = &correlated.event;
        if let Some(range) = &self.time_range {
            if !range.contains(event.timestamp_ns) {
                return false;
            }
        }
        if let Some(producer) = &self.producer {
            if event.producer_id != *producer {
                return false;
            }
        }
        if let Some(correlation) = &self.correlation {
            if event.correlation_id.as_ref() != Some(correlation) {
                return false;
            }
        }
        if let Some(function) = &self.function {
            if event.payload.function_key().as_ref() != Some(function) {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if event.kind() != *kind {
                return false;
            }
        }
        true
    }

    /// Key range for index scans, bounded by the time predicate when present
    fn key_bounds(&self) -> (super::OrderedKey, super::OrderedKey) {
        match &self.time_range {
            Some(range) => (
                (range.start_ns, EventId::MIN),
                (range.end_ns, EventId::MAX),
            ),
            None => ((u64::MIN, EventId::MIN), (u64::MAX, EventId::MAX)),
        }
    }
}

impl IndexedStore {
    /// Execute a query; results ordered by `(timestamp, event_id)`
    pub fn query(&self, query: &Query) -> QueryResult {
        let candidates = self.collect_candidates(query);

        let mut events: Vec<CorrelatedEvent> = candidates
            .into_iter()
            .filter_map(|(_, event_id)| self.get(event_id))
            .filter(|e| query.matches(e))
            .collect();
        events.sort_by_key(|e| (e.event.timestamp_ns, e.event.event_id));
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }

        QueryResult {
            count: events.len(),
            partial: self.is_partial(query),
            events,
        }
    }

    /// Gather `(timestamp, event_id)` candidates from the chosen index
    fn collect_candidates(&self, query: &Query) -> Vec<super::OrderedKey> {
        let (low, high) = query.key_bounds();
        match query.plan() {
            IndexChoice::Correlation => {
                let correlation = query
                    .correlation
                    .as_ref()
                    .expect("plan chose correlation index");
                self.correlation_index()
                    .get(correlation)
                    .map(|set| set.range(low..=high).copied().collect())
                    .unwrap_or_default()
            }
            IndexChoice::Producer => {
                let producer = query.producer.as_ref().expect("plan chose producer index");
                self.producer_index()
                    .get(producer)
                    .map(|set| set.range(low..=high).copied().collect())
                    .unwrap_or_default()
            }
            IndexChoice::Function => {
                let function = query.function.as_ref().expect("plan chose function index");
                self.function_index()
                    .get(function)
                    .map(|set| set.range(low..=high).copied().collect())
                    .unwrap_or_default()
            }
            IndexChoice::TimeRange => self
                .time_index()
                .read()
                .range(low..=high)
                .copied()
                .collect(),
            IndexChoice::FullScan => self
                .time_index()
                .read()
                .iter()
                .copied()
                .collect(),
        }
    }

    /// Could eviction have removed events this query would have matched?
    fn is_partial(&self, query: &Query) -> bool {
        if self.evicted_total() == 0 {
            return false;
        }
        match &query.time_range {
            // No lower bound: the query reaches into evicted history
            None => true,
            Some(range) => range.start_ns <= self.evicted_watermark_ns(),
        }
    }
}
