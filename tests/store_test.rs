/*!
 * Indexed Store Tests
 * Round-trip retrieval, index selection, and bounded eviction
 */

use cinetrace::{
    CallId, Captured, CorrelatedEvent, CorrelationId, Event, EventId, EventKind, FunctionKey,
    IndexChoice, IndexedStore, MatchState, Payload, ProducerId, Query,
};
use pretty_assertions::assert_eq;

fn entry(producer: u32, seq: u64, correlation: &str, function: &str) -> CorrelatedEvent {
    CorrelatedEvent {
        event: Event::new(
            EventId::new(ProducerId(producer), seq),
            ProducerId(producer),
            Payload::FunctionEntry {
                module: "app".into(),
                function: function.into(),
                args: Captured::empty(),
            },
        )
        .with_correlation(CorrelationId::new(correlation))
        .with_call(CallId(seq)),
        matched_peer: None,
        causal_children: Vec::new(),
        match_state: MatchState::Open,
    }
}

#[test]
fn test_round_trip_by_correlation_id() {
    let store = IndexedStore::new(1000);
    let event = entry(1, 0, "req-1", "checkout");
    let id = event.event.event_id;
    store.insert(event);

    let result = store.query(&Query::new().correlation(CorrelationId::new("req-1")));
    assert_eq!(result.count, 1);
    assert_eq!(result.events[0].event.event_id, id);

    // A time range excluding its timestamp does not return it
    let ts = result.events[0].event.timestamp_ns;
    let excluded = store.query(
        &Query::new()
            .correlation(CorrelationId::new("req-1"))
            .time_range(ts + 1, ts + 100),
    );
    assert_eq!(excluded.count, 0);
}

#[test]
fn test_index_precedence() {
    let query = Query::new()
        .correlation(CorrelationId::new("r"))
        .producer(ProducerId(1))
        .function(FunctionKey::new("app", "f"))
        .time_range(0, u64::MAX);
    assert_eq!(query.plan(), IndexChoice::Correlation);

    let query = Query::new()
        .producer(ProducerId(1))
        .function(FunctionKey::new("app", "f"));
    assert_eq!(query.plan(), IndexChoice::Producer);

    let query = Query::new().function(FunctionKey::new("app", "f"));
    assert_eq!(query.plan(), IndexChoice::Function);
}

#[test]
fn test_function_index_retrieval() {
    let store = IndexedStore::new(1000);
    store.insert(entry(1, 0, "r1", "checkout"));
    store.insert(entry(1, 1, "r1", "login"));
    store.insert(entry(2, 2, "r2", "checkout"));

    let result = store.query(&Query::new().function(FunctionKey::new("app", "checkout")));
    assert_eq!(result.count, 2);
    for event in &result.events {
        assert_eq!(
            event.event.payload.function_key(),
            Some(FunctionKey::new("app", "checkout"))
        );
    }
}

#[test]
fn test_producer_index_with_kind_post_filter() {
    let store = IndexedStore::new(1000);
    store.insert(entry(1, 0, "r1", "a"));
    store.insert(entry(1, 1, "r1", "b"));
    store.insert(entry(2, 0, "r1", "c"));

    let result = store.query(
        &Query::new()
            .producer(ProducerId(1))
            .kind(EventKind::FunctionEntry),
    );
    assert_eq!(result.count, 2);

    let result = store.query(
        &Query::new()
            .producer(ProducerId(1))
            .kind(EventKind::FunctionExit),
    );
    assert_eq!(result.count, 0);
}

#[test]
fn test_eviction_keeps_results_ordered_and_flagged() {
    let store = IndexedStore::new(5);
    for seq in 0..12 {
        store.insert(entry(1, seq, "r1", "f"));
    }

    let stats = store.stats();
    assert_eq!(stats.len, 5);
    assert_eq!(stats.evicted_total, 7);

    // Unbounded queries over evicted history are explicitly partial
    let result = store.query(&Query::new().correlation(CorrelationId::new("r1")));
    assert_eq!(result.count, 5);
    assert!(result.partial);

    let keys: Vec<_> = result
        .events
        .iter()
        .map(|e| (e.event.timestamp_ns, e.event.event_id))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);

    // Queries entirely above the watermark are complete
    let watermark = stats.evicted_watermark_ns.unwrap();
    let result = store.query(
        &Query::new()
            .correlation(CorrelationId::new("r1"))
            .time_range(watermark + 1, u64::MAX),
    );
    assert!(!result.partial);
}

#[test]
fn test_empty_store_query_is_not_partial() {
    let store = IndexedStore::new(10);
    let result = store.query(&Query::new());
    assert_eq!(result.count, 0);
    assert!(!result.partial);
}
