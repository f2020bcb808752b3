/*!
 * Capture Limits and Constants
 *
 * Centralized location for pipeline-wide limits, thresholds, and defaults.
 * All values include rationale comments explaining WHY they exist.
 * Performance-critical constants are marked with [PERF].
 */

use std::time::Duration;

// =============================================================================
// RING BUFFER
// =============================================================================

/// Default ring buffer capacity (events)
/// [PERF] Power of 2 keeps the modulo on the hot path cheap
pub const DEFAULT_RING_CAPACITY: usize = 65_536;

/// Retry bound for the drop-oldest write path
/// Caps the evict-then-retry loop so `try_write` stays bounded-time even
/// under pathological producer/consumer interleavings
pub const RING_WRITE_RETRY_LIMIT: usize = 64;

// =============================================================================
// EVENT PAYLOADS
// =============================================================================

/// Default payload truncation cap (bytes)
/// Large arguments/return values are clipped here with an explicit marker;
/// 4KB keeps per-event memory bounded without losing typical payloads
pub const DEFAULT_PAYLOAD_CAP: usize = 4 * 1024;

// =============================================================================
// ASYNC WRITER POOL
// =============================================================================

/// Default number of drain workers
/// One worker guarantees a producer's consecutive batches are correlated in
/// order: with parallel workers an exit can reach its shard before its entry
/// and be flagged as missing. Parallel drain is opt-in for deployments that
/// accept that skew
pub const DEFAULT_WRITER_WORKERS: usize = 1;

/// Default events per drain batch
/// [PERF] Amortizes per-batch correlation/store overhead
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Idle backoff between empty batches
/// Bounded sleep instead of busy-spinning when the ring is empty
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// CORRELATOR
// =============================================================================

/// Default correlator shard count
/// Shards are keyed by correlation id so one operation never splits across
/// shards; 16 keeps lock contention low for a small worker pool
pub const DEFAULT_CORRELATOR_SHARDS: usize = 16;

/// Default time-to-live for a pending entry awaiting its exit
/// After this, the call is finalized as "never returned" - bounds memory
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(30);

/// Default interval between pending-map sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// INDEXED STORE
// =============================================================================

/// Default retention cap (correlated events)
/// Oldest events are evicted beyond this; evictions are observable via the
/// store watermark so queries can flag partially unavailable ranges
pub const DEFAULT_STORE_MAX_EVENTS: usize = 1_000_000;
