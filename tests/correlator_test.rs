/*!
 * Correlator Tests
 * Causal pairing, nesting, and unmatched-event handling
 */

use cinetrace::{
    CallId, Captured, CorrelationContext, CorrelationId, Correlator, Event, EventId, Ingestor,
    MatchState, OverflowPolicy, Payload, ProducerId, RingBuffer, UnmatchedKind,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn capture_setup() -> (Ingestor, Arc<RingBuffer<Event>>, Correlator) {
    let ring = Arc::new(RingBuffer::new(1024, OverflowPolicy::DropNewest));
    let ingestor = Ingestor::new(Arc::clone(&ring), 1024);
    (ingestor, ring, Correlator::new(8))
}

#[test]
fn test_nested_call_scenario() {
    // Producer P: begin "r1", entry(1), entry(2, parent=1), exit(2), exit(1)
    let (ingestor, ring, correlator) = capture_setup();
    let producer = ProducerId(1);
    let mut ctx = CorrelationContext::new();

    ctx.begin(CorrelationId::new("r1"));
    let outer = ingestor.record_function_entry(producer, "web", "handle", &json!([]), &mut ctx);
    let inner = ingestor.record_function_entry(producer, "db", "query", &json!([]), &mut ctx);
    ingestor.record_function_exit(producer, "db", "query", inner, &json!(null), &mut ctx);
    ingestor.record_function_exit(producer, "web", "handle", outer, &json!(null), &mut ctx);
    ctx.end();

    let out = correlator.correlate_batch(ring.read_batch(16));

    // Both exits match their entries
    assert_eq!(correlator.stats().matched_calls, 2);
    assert_eq!(correlator.stats().pending_calls, 0);

    // The inner entry carries the outer call as parent and the same
    // correlation id
    let inner_entry = out
        .events
        .iter()
        .find(|e| {
            e.event.call_id == Some(inner)
                && e.event.kind() == cinetrace::EventKind::FunctionEntry
        })
        .map(|e| &e.event)
        .unwrap();
    assert_eq!(inner_entry.parent_call_id, Some(outer));

    for correlated in &out.events {
        assert_eq!(
            correlated.event.correlation_id,
            Some(CorrelationId::new("r1"))
        );
    }

    // Nesting is recorded as a parent/child causal link
    assert_eq!(out.child_links.len(), 1);
}

#[test]
fn test_unmatched_exit_is_flagged_and_harmless() {
    // An exit whose entry was dropped upstream
    let (_, _, correlator) = capture_setup();
    let exit = Event::new(
        EventId::new(ProducerId(1), 0),
        ProducerId(1),
        Payload::FunctionExit {
            module: "web".into(),
            function: "handle".into(),
            return_value: Captured::empty(),
        },
    )
    .with_call(CallId(99));

    let out = correlator.correlate_batch(vec![exit]);

    assert_eq!(out.events.len(), 1);
    assert_eq!(
        out.events[0].match_state,
        MatchState::Unmatched(UnmatchedKind::MissingEntry)
    );

    // Subsequent batches still correlate normally
    let followup = correlator.correlate_batch(Vec::new());
    assert!(followup.events.is_empty());
}

#[test]
fn test_message_pairing_across_producers() {
    let (ingestor, ring, correlator) = capture_setup();
    let sender_ctx = CorrelationContext::new();
    let mut receiver_ctx = CorrelationContext::new();
    receiver_ctx.begin(CorrelationId::new("r1"));

    let mut sender_ctx_owned = sender_ctx;
    sender_ctx_owned.begin(CorrelationId::new("r1"));
    ingestor.record_message_send(
        ProducerId(1),
        "job-42",
        Some(ProducerId(2)),
        &json!({"work": 1}),
        &sender_ctx_owned,
    );
    ingestor.record_message_receive(
        ProducerId(2),
        "job-42",
        Some(ProducerId(1)),
        &json!({"work": 1}),
        &receiver_ctx,
    );

    let out = correlator.correlate_batch(ring.read_batch(16));

    assert_eq!(correlator.stats().matched_messages, 1);
    let receive = out
        .events
        .iter()
        .find(|e| e.event.producer_id == ProducerId(2))
        .unwrap();
    assert_eq!(receive.match_state, MatchState::Matched);
}

#[test]
fn test_producer_exit_finalizes_open_calls() {
    let (ingestor, ring, correlator) = capture_setup();
    let producer = ProducerId(1);
    let mut ctx = CorrelationContext::new();
    ctx.begin(CorrelationId::new("r1"));

    ingestor.record_function_entry(producer, "web", "handle", &json!([]), &mut ctx);
    ingestor.record_process_exit(producer, "killed", &ctx);

    let out = correlator.correlate_batch(ring.read_batch(16));

    assert_eq!(correlator.stats().pending_calls, 0);
    assert!(out.peer_links.iter().any(|l| {
        l.state == MatchState::Unmatched(UnmatchedKind::NeverReturned) && l.peer.is_none()
    }));
}

proptest! {
    /// Exactly one matched pair per call id, regardless of how two
    /// producers' streams interleave (each producer's own order preserved)
    #[test]
    fn prop_one_matched_pair_per_call_id(
        pairs_a in 1usize..20,
        pairs_b in 1usize..20,
        picks in proptest::collection::vec(any::<bool>(), 0..80)
    ) {
        let correlator = Correlator::new(4);

        let stream = |producer: u32, base: u64, pairs: usize| -> Vec<Event> {
            let mut events = Vec::new();
            let mut seq = 0u64;
            for i in 0..pairs {
                let call = CallId(base + i as u64);
                events.push(
                    Event::new(
                        EventId::new(ProducerId(producer), seq),
                        ProducerId(producer),
                        Payload::FunctionEntry {
                            module: "m".into(),
                            function: "f".into(),
                            args: Captured::empty(),
                        },
                    )
                    .with_correlation(CorrelationId::new("op"))
                    .with_call(call),
                );
                seq += 1;
                events.push(
                    Event::new(
                        EventId::new(ProducerId(producer), seq),
                        ProducerId(producer),
                        Payload::FunctionExit {
                            module: "m".into(),
                            function: "f".into(),
                            return_value: Captured::empty(),
                        },
                    )
                    .with_correlation(CorrelationId::new("op"))
                    .with_call(call),
                );
                seq += 1;
            }
            events
        };

        let mut a = std::collections::VecDeque::from(stream(1, 0, pairs_a));
        let mut b = std::collections::VecDeque::from(stream(2, 10_000, pairs_b));

        // Interleave the two per-producer streams per the pick sequence,
        // then flush the remainders
        let mut interleaved = Vec::new();
        for pick in picks {
            let next = if pick { a.pop_front() } else { b.pop_front() };
            if let Some(event) = next {
                interleaved.push(event);
            }
        }
        interleaved.extend(a);
        interleaved.extend(b);

        correlator.correlate_batch(interleaved);

        let stats = correlator.stats();
        prop_assert_eq!(stats.matched_calls, (pairs_a + pairs_b) as u64);
        prop_assert_eq!(stats.pending_calls, 0);
        prop_assert_eq!(stats.unmatched_events, 0);
    }

    /// Truncating a payload already under the cap is a no-op
    #[test]
    fn prop_truncation_idempotent(
        bytes in proptest::collection::vec(any::<u8>(), 0..256),
        cap in 0usize..300
    ) {
        let first = Captured::capture(bytes.clone(), cap);
        prop_assert!(first.bytes.len() <= bytes.len());
        prop_assert_eq!(first.original_size, bytes.len());
        if bytes.len() <= cap {
            prop_assert!(!first.truncated);
            prop_assert_eq!(&first.bytes, &bytes);
        } else {
            prop_assert!(first.truncated);
            prop_assert_eq!(first.bytes.len(), cap);
        }

        // Re-capturing the clipped bytes changes nothing
        let second = Captured::capture(first.bytes.clone(), cap);
        prop_assert_eq!(second.bytes, first.bytes);
        prop_assert!(!second.truncated);
    }
}
