/*!
 * Lock-Free Ring Buffer
 * Bounded MPMC queue absorbing capture events from concurrent producers
 *
 * Write path is lock-free (atomics/CAS only): slot index comes from an
 * atomically incremented write cursor, and a per-slot sequence word
 * distinguishes empty/writing/ready/reading states so concurrent access
 * never observes a torn slot. Consumers claim slots through an atomically
 * incremented read cursor; each event is delivered to exactly one consumer.
 *
 * Buffer-full is a policy outcome, not an error: drop-oldest, drop-newest,
 * or a bounded block, each with an observable per-reason drop counter.
 */

use crate::core::limits::RING_WRITE_RETRY_LIMIT;
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Behavior when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Evict the oldest unread event to make room; producers never block
    DropOldest,
    /// Reject the incoming write and count it
    DropNewest,
    /// Producer waits up to the duration for space, then the write is dropped
    BlockWithTimeout(Duration),
}

/// Why a write was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// Incoming write rejected under `DropNewest`
    CapacityNewest,
    /// Oldest event evicted under `DropOldest` (the incoming write succeeded,
    /// but an older event was lost)
    CapacityOldest,
    /// `BlockWithTimeout` deadline expired before space appeared
    Timeout,
}

/// Outcome of a write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Event accepted into the buffer
    Written,
    /// Event (or an older one, under `DropOldest`) was lost; always counted
    Dropped(DropReason),
    /// Buffer full and the policy would wait; returned only by the
    /// non-blocking probe so callers can distinguish "would wait" from
    /// "waited and timed out"
    Blocked,
}

/// Snapshot of ring counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RingStats {
    pub capacity: usize,
    pub len: usize,
    pub dropped_newest: u64,
    pub dropped_oldest: u64,
    pub dropped_timeout: u64,
}

impl RingStats {
    #[inline]
    pub fn total_dropped(&self) -> u64 {
        self.dropped_newest + self.dropped_oldest + self.dropped_timeout
    }
}

/// One buffer cell: sequence/state word plus the event slot
///
/// Sequence values encode slot state relative to the cursors:
/// `seq == pos` empty and claimable, `seq == pos + 1` ready to read,
/// intermediate values mean a producer/consumer transiently owns the slot.
struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC ring buffer with configurable overflow policy
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    capacity: usize,
    /// Next write position (claimed atomically by producers)
    head: CachePadded<AtomicUsize>,
    /// Next read position (claimed atomically by consumers)
    tail: CachePadded<AtomicUsize>,
    policy: OverflowPolicy,
    dropped_newest: AtomicU64,
    dropped_oldest: AtomicU64,
    dropped_timeout: AtomicU64,
    /// Producers park here under `BlockWithTimeout`; consumers signal after
    /// freeing slots. Only touched on the full-buffer slow path.
    space_lock: Mutex<()>,
    space_cond: Condvar,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring with fixed capacity and overflow policy
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            capacity,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            policy,
            dropped_newest: AtomicU64::new(0),
            dropped_oldest: AtomicU64::new(0),
            dropped_timeout: AtomicU64::new(0),
            space_lock: Mutex::new(()),
            space_cond: Condvar::new(),
        }
    }

    /// Write an event, applying the configured overflow policy when full
    ///
    /// Bounded time under every policy: lock-free fast path, bounded
    /// evict-retry loop under `DropOldest`, bounded wait under
    /// `BlockWithTimeout`. Never blocks on I/O, never panics when full.
    pub fn try_write(&self, item: T) -> WriteOutcome {
        match self.policy {
            OverflowPolicy::DropNewest => match self.try_enqueue(item) {
                Ok(()) => WriteOutcome::Written,
                Err(_rejected) => {
                    self.dropped_newest.fetch_add(1, Ordering::Relaxed);
                    WriteOutcome::Dropped(DropReason::CapacityNewest)
                }
            },
            OverflowPolicy::DropOldest => self.write_drop_oldest(item),
            OverflowPolicy::BlockWithTimeout(timeout) => self.write_blocking(item, timeout),
        }
    }

    /// Non-blocking probe: like `try_write`, but a full buffer under
    /// `BlockWithTimeout` returns `Blocked` immediately instead of waiting
    pub fn try_write_nonblocking(&self, item: T) -> WriteOutcome {
        match self.policy {
            OverflowPolicy::BlockWithTimeout(_) => match self.try_enqueue(item) {
                Ok(()) => WriteOutcome::Written,
                Err(_rejected) => WriteOutcome::Blocked,
            },
            _ => self.try_write(item),
        }
    }

    /// Claim up to `max_items` contiguous events for one consumer
    ///
    /// Removed items are invisible to other consumers: this is a queue, not
    /// a broadcast log.
    pub fn read_batch(&self, max_items: usize) -> Vec<T> {
        let mut batch = Vec::with_capacity(max_items.min(self.capacity));
        while batch.len() < max_items {
            match self.try_dequeue() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        if !batch.is_empty() {
            self.signal_space();
        }
        batch
    }

    /// Pop a single event (consumer side)
    pub fn try_read(&self) -> Option<T> {
        let item = self.try_dequeue();
        if item.is_some() {
            self.signal_space();
        }
        item
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of buffered events (approximate under concurrency)
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail).min(self.capacity)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    #[inline]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Counter snapshot; drops are never silent
    pub fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.capacity,
            len: self.len(),
            dropped_newest: self.dropped_newest.load(Ordering::Relaxed),
            dropped_oldest: self.dropped_oldest.load(Ordering::Relaxed),
            dropped_timeout: self.dropped_timeout.load(Ordering::Relaxed),
        }
    }

    fn write_drop_oldest(&self, item: T) -> WriteOutcome {
        let mut item = item;
        for _ in 0..RING_WRITE_RETRY_LIMIT {
            match self.try_enqueue(item) {
                Ok(()) => return WriteOutcome::Written,
                Err(rejected) => {
                    item = rejected;
                    // Evict the oldest unread event to make room. A consumer
                    // may win the race for it; either way the slot frees up.
                    if self.try_dequeue().is_some() {
                        self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        // Retry budget exhausted under extreme contention; drop the incoming
        // write rather than exceed the bounded-time contract.
        self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
        WriteOutcome::Dropped(DropReason::CapacityOldest)
    }

    fn write_blocking(&self, item: T, timeout: Duration) -> WriteOutcome {
        let deadline = Instant::now() + timeout;
        let mut item = item;
        loop {
            match self.try_enqueue(item) {
                Ok(()) => return WriteOutcome::Written,
                Err(rejected) => item = rejected,
            }
            let mut guard = self.space_lock.lock();
            // Re-check under the lock: a consumer freeing space between the
            // failed enqueue and this wait must not be missed.
            if !self.is_full() {
                continue;
            }
            let timed_out = self
                .space_cond
                .wait_until(&mut guard, deadline)
                .timed_out();
            drop(guard);
            if timed_out {
                match self.try_enqueue(item) {
                    Ok(()) => return WriteOutcome::Written,
                    Err(_rejected) => {
                        self.dropped_timeout.fetch_add(1, Ordering::Relaxed);
                        return WriteOutcome::Dropped(DropReason::Timeout);
                    }
                }
            }
        }
    }

    #[inline]
    fn signal_space(&self) {
        if matches!(self.policy, OverflowPolicy::BlockWithTimeout(_)) {
            // Lock/unlock pairs the notify with a waiter's under-lock
            // re-check so a wakeup between check and park is never lost.
            drop(self.space_lock.lock());
            self.space_cond.notify_all();
        }
    }

    /// Lock-free enqueue; `Err` returns the item when the buffer is full
    fn try_enqueue(&self, item: T) -> Result<(), T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % self.capacity];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;
            if diff == 0 {
                // Slot empty at our position; claim it
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(item) };
                        // Publish: marks the slot ready for readers
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Slot still holds an unread event a full lap behind: full
                return Err(item);
            } else {
                // Another producer claimed this position; reload
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Lock-free dequeue; `None` when empty
    fn try_dequeue(&self) -> Option<T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % self.capacity];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;
            if diff == 0 {
                // Slot ready at our position; claim it
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        // Recycle: marks the slot empty for the next lap
                        slot.seq
                            .store(pos.wrapping_add(self.capacity), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Slot not yet written at our position: empty
                return None;
            } else {
                // Another consumer claimed this position; reload
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Drain remaining initialized slots so their contents are dropped
        while self.try_dequeue().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_write_read() {
        let ring = RingBuffer::new(8, OverflowPolicy::DropNewest);

        assert_eq!(ring.try_write(1u32), WriteOutcome::Written);
        assert_eq!(ring.try_write(2u32), WriteOutcome::Written);

        assert_eq!(ring.try_read(), Some(1));
        assert_eq!(ring.try_read(), Some(2));
        assert_eq!(ring.try_read(), None);
    }

    #[test]
    fn test_drop_newest_rejects_when_full() {
        let ring = RingBuffer::new(4, OverflowPolicy::DropNewest);

        for i in 0..4u32 {
            assert_eq!(ring.try_write(i), WriteOutcome::Written);
        }
        assert_eq!(
            ring.try_write(99),
            WriteOutcome::Dropped(DropReason::CapacityNewest)
        );

        let batch = ring.read_batch(16);
        assert_eq!(batch, vec![0, 1, 2, 3]);
        assert_eq!(ring.stats().dropped_newest, 1);
    }

    #[test]
    fn test_drop_oldest_evicts_to_make_room() {
        let ring = RingBuffer::new(4, OverflowPolicy::DropOldest);

        for i in 0..6u32 {
            assert_eq!(ring.try_write(i), WriteOutcome::Written);
        }

        let batch = ring.read_batch(16);
        assert_eq!(batch, vec![2, 3, 4, 5]);
        assert_eq!(ring.stats().dropped_oldest, 2);
    }

    #[test]
    fn test_block_with_timeout_drops_after_deadline() {
        let ring = RingBuffer::new(2, OverflowPolicy::BlockWithTimeout(Duration::from_millis(10)));

        assert_eq!(ring.try_write(1u32), WriteOutcome::Written);
        assert_eq!(ring.try_write(2u32), WriteOutcome::Written);

        let start = Instant::now();
        assert_eq!(
            ring.try_write(3u32),
            WriteOutcome::Dropped(DropReason::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(ring.stats().dropped_timeout, 1);
    }

    #[test]
    fn test_block_with_timeout_wakes_on_consume() {
        let ring = Arc::new(RingBuffer::new(
            2,
            OverflowPolicy::BlockWithTimeout(Duration::from_secs(5)),
        ));
        ring.try_write(1u32);
        ring.try_write(2u32);

        let writer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.try_write(3u32))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(ring.try_read(), Some(1));

        assert_eq!(writer.join().unwrap(), WriteOutcome::Written);
    }

    #[test]
    fn test_nonblocking_probe_reports_blocked() {
        let ring = RingBuffer::new(1, OverflowPolicy::BlockWithTimeout(Duration::from_secs(1)));
        assert_eq!(ring.try_write_nonblocking(1u32), WriteOutcome::Written);
        assert_eq!(ring.try_write_nonblocking(2u32), WriteOutcome::Blocked);
    }

    #[test]
    fn test_concurrent_producers_exactly_once_delivery() {
        const PRODUCERS: u64 = 8;
        const PER_PRODUCER: u64 = 1000;

        let ring = Arc::new(RingBuffer::new(
            (PRODUCERS * PER_PRODUCER) as usize,
            OverflowPolicy::DropNewest,
        ));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        assert_eq!(ring.try_write(p * PER_PRODUCER + i), WriteOutcome::Written);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        loop {
            let batch = ring.read_batch(128);
            if batch.is_empty() {
                break;
            }
            for item in batch {
                assert!(seen.insert(item), "duplicate delivery of {}", item);
            }
        }
        assert_eq!(seen.len(), (PRODUCERS * PER_PRODUCER) as usize);
    }

    #[test]
    fn test_drop_accounting_under_concurrent_overflow() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 5000;
        const CAPACITY: usize = 64;

        let ring = Arc::new(RingBuffer::new(CAPACITY, OverflowPolicy::DropOldest));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        // DropOldest must never report the incoming write as
                        // rejected except under retry-budget exhaustion
                        let _ = ring.try_write(i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut delivered = 0u64;
        while ring.try_read().is_some() {
            delivered += 1;
        }
        let stats = ring.stats();
        assert_eq!(delivered + stats.total_dropped(), PRODUCERS * PER_PRODUCER);
        assert!(delivered <= CAPACITY as u64);
    }

    #[test]
    fn test_per_producer_order_preserved() {
        let ring = Arc::new(RingBuffer::new(4096, OverflowPolicy::DropNewest));

        let handles: Vec<_> = (0..4u64)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..500u64 {
                        ring.try_write((p, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut last_seen = std::collections::HashMap::new();
        while let Some((p, i)) = ring.try_read() {
            if let Some(prev) = last_seen.insert(p, i) {
                assert!(i > prev, "producer {} reordered: {} after {}", p, i, prev);
            }
        }
    }
}
