/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 *
 * The capture hot path (ingestion, ring writes) is infallible by contract:
 * capacity exhaustion, unmatched pairs, and oversize payloads are policy
 * outcomes surfaced through counters and flags, never through these types.
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Ring buffer capacity must be greater than zero")]
    #[diagnostic(
        code(config::zero_ring_capacity),
        help("Set ring_capacity to the number of events the buffer should absorb between drains.")
    )]
    ZeroRingCapacity,

    #[error("Writer pool requires at least one worker")]
    #[diagnostic(
        code(config::zero_workers),
        help("Set writer.workers to 1 or more; workers drain the ring into the store.")
    )]
    ZeroWorkers,

    #[error("Writer batch size must be greater than zero")]
    #[diagnostic(
        code(config::zero_batch_size),
        help("Set writer.batch_size to the number of events each drain pass should claim.")
    )]
    ZeroBatchSize,

    #[error("Correlator requires at least one shard")]
    #[diagnostic(
        code(config::zero_shards),
        help("Set correlator.shards to 1 or more; shards are keyed by correlation id.")
    )]
    ZeroShards,

    #[error("Store retention cap must be greater than zero")]
    #[diagnostic(
        code(config::zero_retention),
        help("Set store.max_events to the number of correlated events to retain before eviction.")
    )]
    ZeroRetention,

    #[error("Block-with-timeout overflow policy requires a non-zero timeout")]
    #[diagnostic(
        code(config::zero_block_timeout),
        help("Producers must never wait unbounded; give BlockWithTimeout a positive duration.")
    )]
    ZeroBlockTimeout,
}

/// Pipeline lifecycle errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("Invalid capture configuration")]
    #[diagnostic(code(pipeline::invalid_config))]
    Config(
        #[from]
        #[diagnostic_source]
        ConfigError,
    ),
}

/// Common result type for pipeline lifecycle operations
pub type PipelineResult<T> = Result<T, PipelineError>;
