/*!
 * Capture Pipeline
 * Facade wiring ring, ingestor, writer pool, correlator, and store together
 *
 * Data flow: instrumented call site -> Ingestor -> RingBuffer -> WriterPool
 * -> Correlator -> IndexedStore <- Query.
 */

use crate::config::CaptureConfig;
use crate::core::errors::PipelineResult;
use crate::correlate::{Correlator, CorrelatorStats};
use crate::event::Event;
use crate::ingest::Ingestor;
use crate::ring::{RingBuffer, RingStats};
use crate::store::{IndexedStore, Query, QueryResult, StoreStats};
use crate::writer::{WriterPool, WriterStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Health surface polled by external monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub ring: RingStats,
    /// Writes the ingestor could not hand to the ring
    pub ingest_lost_writes: u64,
    pub writer: WriterStats,
    pub correlator: CorrelatorStats,
    pub store: StoreStats,
}

/// A running capture pipeline
///
/// Must be started inside a tokio runtime; the writer pool and sweeper run
/// as background tasks until [`CapturePipeline::shutdown`].
pub struct CapturePipeline {
    ring: Arc<RingBuffer<Event>>,
    ingestor: Arc<Ingestor>,
    correlator: Arc<Correlator>,
    store: Arc<IndexedStore>,
    writers: WriterPool,
}

impl CapturePipeline {
    /// Validate the configuration and start all stages
    pub fn start(config: CaptureConfig) -> PipelineResult<Self> {
        config.validate()?;

        let ring = Arc::new(RingBuffer::new(config.ring_capacity, config.overflow_policy));
        let ingestor = Arc::new(Ingestor::new(Arc::clone(&ring), config.payload_cap_bytes));
        let correlator = Arc::new(Correlator::new(config.correlator.shards));
        let store = Arc::new(IndexedStore::new(config.store.max_events));
        let writers = WriterPool::spawn(
            Arc::clone(&ring),
            Arc::clone(&correlator),
            Arc::clone(&store),
            config.writer.clone(),
            config.correlator.pending_ttl,
            config.correlator.sweep_interval,
        );

        info!(
            ring_capacity = config.ring_capacity,
            policy = ?config.overflow_policy,
            "capture pipeline started"
        );
        Ok(Self {
            ring,
            ingestor,
            correlator,
            store,
            writers,
        })
    }

    /// Producer-facing capture API (clone freely across producers)
    pub fn ingestor(&self) -> Arc<Ingestor> {
        Arc::clone(&self.ingestor)
    }

    /// Execute a query against the correlated history
    pub fn query(&self, query: &Query) -> QueryResult {
        self.store.query(query)
    }

    /// Entries still awaiting their exit
    pub fn open_calls(&self) -> Vec<crate::correlate::CorrelatedEvent> {
        self.store.open_calls()
    }

    /// Snapshot of every stage's counters
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            ring: self.ring.stats(),
            ingest_lost_writes: self.ingestor.lost_writes(),
            writer: self.writers.stats(),
            correlator: self.correlator.stats(),
            store: self.store.stats(),
        }
    }

    /// Drain the ring, stop the workers, and release the pipeline
    ///
    /// Events already in the ring are flushed into the store before workers
    /// exit.
    pub async fn shutdown(self) {
        self.writers.shutdown().await;
        info!("capture pipeline shut down");
    }
}
