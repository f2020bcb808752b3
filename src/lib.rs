/*!
 * cinetrace
 * Execution-capture and causal-correlation engine
 *
 * Instrumented call sites emit discrete events (function entry/exit, state
 * mutation, message send/receive, process lifecycle); the engine absorbs
 * them at high rates with near-zero producer overhead, links them into
 * causally connected chains, and makes the correlated history queryable.
 */

pub mod config;
pub mod core;
pub mod correlate;
pub mod event;
pub mod ingest;
pub mod pipeline;
pub mod ring;
pub mod store;
pub mod telemetry;
pub mod writer;

// Re-exports
pub use config::{CaptureConfig, CorrelatorConfig, StoreConfig, WriterConfig};
pub use self::core::errors::{ConfigError, PipelineError, PipelineResult};
pub use self::core::types::{
    CallId, CorrelationId, EventId, InlineString, MessageId, ProducerId,
};
pub use correlate::{
    ChildLink, CorrelatedEvent, Correlator, CorrelatorStats, MatchState, PeerLink, UnmatchedKind,
};
pub use event::{Captured, CorrelationContext, Event, EventKind, FunctionKey, Payload};
pub use ingest::Ingestor;
pub use pipeline::{CapturePipeline, PipelineStats};
pub use ring::{DropReason, OverflowPolicy, RingBuffer, RingStats, WriteOutcome};
pub use store::{IndexChoice, IndexedStore, Query, QueryResult, StoreStats, TimeRange};
pub use telemetry::init_tracing;
pub use writer::{WriterPool, WriterStats};
