/*!
 * Capture Configuration
 * Tunables for every pipeline stage, with validated defaults
 */

use crate::core::errors::ConfigError;
use crate::core::limits;
use crate::ring::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Writer pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Number of drain workers
    pub workers: usize,
    /// Events claimed per drain pass
    pub batch_size: usize,
    /// Idle backoff between empty batches
    pub poll_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: limits::DEFAULT_WRITER_WORKERS,
            batch_size: limits::DEFAULT_BATCH_SIZE,
            poll_interval: limits::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Correlator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Shard count; shards are keyed by correlation id
    pub shards: usize,
    /// How long a pending entry may await its exit before it is flushed
    /// unmatched
    pub pending_ttl: Duration,
    /// Interval between pending-map sweeps
    pub sweep_interval: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            shards: limits::DEFAULT_CORRELATOR_SHARDS,
            pending_ttl: limits::DEFAULT_PENDING_TTL,
            sweep_interval: limits::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Retention cap; oldest events are evicted beyond this
    pub max_events: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_events: limits::DEFAULT_STORE_MAX_EVENTS,
        }
    }
}

/// Top-level capture pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Ring buffer capacity (events)
    pub ring_capacity: usize,
    /// Behavior when the ring is full. Default is `DropOldest`: producers
    /// never block, and the newest events - the ones closest to a failure -
    /// are the ones kept.
    pub overflow_policy: OverflowPolicy,
    /// Payload truncation cap (bytes)
    pub payload_cap_bytes: usize,
    pub writer: WriterConfig,
    pub correlator: CorrelatorConfig,
    pub store: StoreConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ring_capacity: limits::DEFAULT_RING_CAPACITY,
            overflow_policy: OverflowPolicy::DropOldest,
            payload_cap_bytes: limits::DEFAULT_PAYLOAD_CAP,
            writer: WriterConfig::default(),
            correlator: CorrelatorConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Validate before the pipeline starts; invalid values are rejected here
    /// so the running pipeline never has to handle them
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring_capacity == 0 {
            return Err(ConfigError::ZeroRingCapacity);
        }
        if self.writer.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.writer.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.correlator.shards == 0 {
            return Err(ConfigError::ZeroShards);
        }
        if self.store.max_events == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        if let OverflowPolicy::BlockWithTimeout(d) = self.overflow_policy {
            if d.is_zero() {
                return Err(ConfigError::ZeroBlockTimeout);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CaptureConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_writer_pool_is_single_worker() {
        // One worker keeps per-producer entry/exit order across batches; see
        // limits::DEFAULT_WRITER_WORKERS
        assert_eq!(WriterConfig::default().workers, 1);
    }

    #[test]
    fn test_default_overflow_policy_is_drop_oldest() {
        assert_eq!(
            CaptureConfig::default().overflow_policy,
            OverflowPolicy::DropOldest
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = CaptureConfig {
            ring_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRingCapacity));
    }

    #[test]
    fn test_zero_block_timeout_rejected() {
        let config = CaptureConfig {
            overflow_policy: OverflowPolicy::BlockWithTimeout(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroBlockTimeout));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = CaptureConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CaptureConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ring_capacity, config.ring_capacity);
        assert_eq!(back.overflow_policy, config.overflow_policy);
    }
}
