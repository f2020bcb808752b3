/*!
 * Ingestor
 * The sole entry point instrumented code calls
 *
 * Converts primitive call-site data into an `Event` and forwards it to the
 * ring buffer. Hot-path budget per call: struct construction, payload
 * truncation, one ring write. No disk I/O, no cross-producer locks, no
 * unbounded allocation.
 *
 * Tracing failures are invisible to the traced program: a rejected ring
 * write still returns a valid call id to the caller and only increments the
 * loss counter.
 */

use crate::core::types::{CallId, CorrelationId, EventId, MessageId, ProducerId};
use crate::event::{Captured, CorrelationContext, Event, Payload};
use crate::ring::{RingBuffer, WriteOutcome};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Producer-facing capture API
pub struct Ingestor {
    ring: Arc<RingBuffer<Event>>,
    payload_cap: usize,
    /// Fresh call id per invocation, process-wide
    call_ids: AtomicU64,
    /// Per-producer event sequence counters (event_id ordering is strictly
    /// increasing per producer)
    sequences: DashMap<ProducerId, AtomicU64, ahash::RandomState>,
    /// Writes rejected by the ring; never surfaced to the caller
    lost_writes: AtomicU64,
}

impl Ingestor {
    pub fn new(ring: Arc<RingBuffer<Event>>, payload_cap: usize) -> Self {
        Self {
            ring,
            payload_cap,
            call_ids: AtomicU64::new(1),
            sequences: DashMap::with_hasher(ahash::RandomState::new()),
            lost_writes: AtomicU64::new(0),
        }
    }

    /// Record a function entry; returns the fresh call id
    ///
    /// Correlation id and parent call id are read from the producer's live
    /// context (a fresh correlation id is minted if no scope is open); a
    /// call scope for the new invocation is pushed onto the context.
    pub fn record_function_entry(
        &self,
        producer: ProducerId,
        module: &str,
        function: &str,
        args: &serde_json::Value,
        ctx: &mut CorrelationContext,
    ) -> CallId {
        let call_id = self.next_call_id();
        let correlation = ctx
            .current_correlation()
            .cloned()
            .unwrap_or_else(CorrelationId::fresh);
        let parent = ctx.current_call();
        ctx.push_call(correlation.clone(), call_id);

        let event = Event::new(
            self.next_event_id(producer),
            producer,
            Payload::FunctionEntry {
                module: module.into(),
                function: function.into(),
                args: Captured::from_value(args, self.payload_cap),
            },
        )
        .with_correlation(correlation)
        .with_call(call_id)
        .with_parent(parent);

        self.submit(event);
        call_id
    }

    /// Record a function exit; pops the invocation's scope from the context
    pub fn record_function_exit(
        &self,
        producer: ProducerId,
        module: &str,
        function: &str,
        call_id: CallId,
        return_value: &serde_json::Value,
        ctx: &mut CorrelationContext,
    ) {
        // The popped scope carries the entry's correlation id; fall back to
        // the current scope for exits whose entry was never recorded.
        let correlation = ctx
            .pop_call(call_id)
            .or_else(|| ctx.current_correlation().cloned());
        let parent = ctx.current_call();

        let mut event = Event::new(
            self.next_event_id(producer),
            producer,
            Payload::FunctionExit {
                module: module.into(),
                function: function.into(),
                return_value: Captured::from_value(return_value, self.payload_cap),
            },
        )
        .with_call(call_id)
        .with_parent(parent);
        if let Some(correlation) = correlation {
            event = event.with_correlation(correlation);
        }

        self.submit(event);
    }

    /// Record a state mutation within the current scope
    pub fn record_state_change(
        &self,
        producer: ProducerId,
        subject: &str,
        old: &serde_json::Value,
        new: &serde_json::Value,
        ctx: &CorrelationContext,
    ) {
        let event = self.stamped(
            producer,
            Payload::StateChange {
                subject: subject.into(),
                old: Captured::from_value(old, self.payload_cap),
                new: Captured::from_value(new, self.payload_cap),
            },
            ctx,
        );
        self.submit(event);
    }

    /// Record a message send; `message_id` is the caller-supplied identity
    /// that pairs it with the matching receive
    pub fn record_message_send(
        &self,
        producer: ProducerId,
        message_id: &str,
        to: Option<ProducerId>,
        body: &serde_json::Value,
        ctx: &CorrelationContext,
    ) {
        let event = self.stamped(
            producer,
            Payload::MessageSend {
                message_id: MessageId::new(message_id),
                to,
                body: Captured::from_value(body, self.payload_cap),
            },
            ctx,
        );
        self.submit(event);
    }

    /// Record a message receive
    pub fn record_message_receive(
        &self,
        producer: ProducerId,
        message_id: &str,
        from: Option<ProducerId>,
        body: &serde_json::Value,
        ctx: &CorrelationContext,
    ) {
        let event = self.stamped(
            producer,
            Payload::MessageReceive {
                message_id: MessageId::new(message_id),
                from,
                body: Captured::from_value(body, self.payload_cap),
            },
            ctx,
        );
        self.submit(event);
    }

    /// Record a producer spawning another execution unit
    pub fn record_process_spawn(
        &self,
        producer: ProducerId,
        parent: Option<ProducerId>,
        name: &str,
        ctx: &CorrelationContext,
    ) {
        let event = self.stamped(
            producer,
            Payload::ProcessSpawn {
                parent,
                name: name.into(),
            },
            ctx,
        );
        self.submit(event);
    }

    /// Record a producer terminating
    ///
    /// Downstream, the correlator finalizes every pending call of this
    /// producer as "never returned".
    pub fn record_process_exit(&self, producer: ProducerId, reason: &str, ctx: &CorrelationContext) {
        let event = self.stamped(
            producer,
            Payload::ProcessExit {
                reason: reason.into(),
            },
            ctx,
        );
        self.submit(event);
    }

    /// Record an application-level error event
    pub fn record_error(
        &self,
        producer: ProducerId,
        message: &str,
        context: &serde_json::Value,
        ctx: &CorrelationContext,
    ) {
        let event = self.stamped(
            producer,
            Payload::Error {
                message: message.into(),
                context: Captured::from_value(context, self.payload_cap),
            },
            ctx,
        );
        self.submit(event);
    }

    /// Writes rejected by the ring so far
    #[inline]
    pub fn lost_writes(&self) -> u64 {
        self.lost_writes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn payload_cap(&self) -> usize {
        self.payload_cap
    }

    /// Build an event stamped with the context's current scope
    fn stamped(&self, producer: ProducerId, payload: Payload, ctx: &CorrelationContext) -> Event {
        let mut event = Event::new(self.next_event_id(producer), producer, payload)
            .with_parent(ctx.current_call());
        if let Some(correlation) = ctx.current_correlation() {
            event = event.with_correlation(correlation.clone());
        }
        event
    }

    #[inline]
    fn next_call_id(&self) -> CallId {
        CallId(self.call_ids.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    fn next_event_id(&self, producer: ProducerId) -> EventId {
        let seq = self
            .sequences
            .entry(producer)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        EventId::new(producer, seq)
    }

    #[inline]
    fn submit(&self, event: Event) {
        match self.ring.try_write(event) {
            WriteOutcome::Written => {}
            WriteOutcome::Dropped(_) | WriteOutcome::Blocked => {
                self.lost_writes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
