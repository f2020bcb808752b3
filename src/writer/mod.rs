/*!
 * Async Writer Pool
 * Supervised workers that drain the ring into the correlator and store
 *
 * Decouples the producer-side hot path from correlation and storage cost.
 * A fixed set of workers repeatedly claims a batch, correlates it, and
 * inserts the result. Idle workers back off with a bounded sleep instead of
 * busy-spinning. A worker that panics mid-batch is restarted; the in-flight
 * batch is lost, counted, and bounded to one batch's worth.
 */

use crate::config::WriterConfig;
use crate::correlate::Correlator;
use crate::event::Event;
use crate::ring::RingBuffer;
use crate::store::IndexedStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Writer pool health counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterStats {
    pub batches_processed: u64,
    pub events_processed: u64,
    /// Batches lost to worker panics (at most one per restart)
    pub lost_batches: u64,
    pub worker_restarts: u64,
}

#[derive(Default)]
struct WriterCounters {
    batches: AtomicU64,
    events: AtomicU64,
    lost_batches: AtomicU64,
    restarts: AtomicU64,
}

/// Handle to the running drain workers and the pending-pair sweeper
pub struct WriterPool {
    shutdown_tx: watch::Sender<bool>,
    supervisors: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
    counters: Arc<WriterCounters>,
}

impl WriterPool {
    /// Spawn the worker pool and sweeper onto the current tokio runtime
    pub fn spawn(
        ring: Arc<RingBuffer<Event>>,
        correlator: Arc<Correlator>,
        store: Arc<IndexedStore>,
        config: WriterConfig,
        pending_ttl: Duration,
        sweep_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(WriterCounters::default());

        let supervisors = (0..config.workers)
            .map(|worker_id| {
                tokio::spawn(supervise(
                    worker_id,
                    Arc::clone(&ring),
                    Arc::clone(&correlator),
                    Arc::clone(&store),
                    config.clone(),
                    shutdown_rx.clone(),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&correlator),
            Arc::clone(&store),
            pending_ttl,
            sweep_interval,
            shutdown_rx,
        ));

        info!(workers = config.workers, batch_size = config.batch_size, "writer pool started");
        Self {
            shutdown_tx,
            supervisors,
            sweeper,
            counters,
        }
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            batches_processed: self.counters.batches.load(Ordering::Relaxed),
            events_processed: self.counters.events.load(Ordering::Relaxed),
            lost_batches: self.counters.lost_batches.load(Ordering::Relaxed),
            worker_restarts: self.counters.restarts.load(Ordering::Relaxed),
        }
    }

    /// Signal shutdown and wait for workers to drain the ring and exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.supervisors {
            let _ = handle.await;
        }
        let _ = self.sweeper.await;
        info!("writer pool shut down");
    }
}

/// Restart a worker on panic; in-flight loss is bounded to one batch
async fn supervise(
    worker_id: usize,
    ring: Arc<RingBuffer<Event>>,
    correlator: Arc<Correlator>,
    store: Arc<IndexedStore>,
    config: WriterConfig,
    shutdown_rx: watch::Receiver<bool>,
    counters: Arc<WriterCounters>,
) {
    loop {
        let handle = tokio::spawn(worker_loop(
            worker_id,
            Arc::clone(&ring),
            Arc::clone(&correlator),
            Arc::clone(&store),
            config.clone(),
            shutdown_rx.clone(),
            Arc::clone(&counters),
        ));
        match handle.await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                counters.lost_batches.fetch_add(1, Ordering::Relaxed);
                counters.restarts.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id, "writer worker panicked; restarting");
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    ring: Arc<RingBuffer<Event>>,
    correlator: Arc<Correlator>,
    store: Arc<IndexedStore>,
    config: WriterConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    counters: Arc<WriterCounters>,
) {
    debug!(worker_id, "writer worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let batch = ring.read_batch(config.batch_size);
        if batch.is_empty() {
            // Idle backoff: bounded sleep, woken early by shutdown
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
            continue;
        }
        process_batch(&correlator, &store, &counters, batch);
    }

    // Final drain: flush whatever the producers got in before shutdown
    loop {
        let batch = ring.read_batch(config.batch_size);
        if batch.is_empty() {
            break;
        }
        process_batch(&correlator, &store, &counters, batch);
    }
    debug!(worker_id, "writer worker stopped");
}

fn process_batch(
    correlator: &Correlator,
    store: &IndexedStore,
    counters: &WriterCounters,
    batch: Vec<Event>,
) {
    #[cfg(test)]
    fail_on_marker(&batch);
    counters.batches.fetch_add(1, Ordering::Relaxed);
    counters.events.fetch_add(batch.len() as u64, Ordering::Relaxed);
    let correlated = correlator.correlate_batch(batch);
    store.insert_batch(correlated);
}

/// Test hook: a marker error event fails the whole batch so supervision can
/// be exercised without a real correlator/store defect
#[cfg(test)]
fn fail_on_marker(batch: &[Event]) {
    use crate::event::Payload;
    let poisoned = batch.iter().any(|e| {
        matches!(&e.payload, Payload::Error { message, .. } if message.as_str() == "writer-fault")
    });
    if poisoned {
        panic!("injected writer fault");
    }
}

/// Periodically flush pending pairs older than the TTL as unmatched
async fn sweep_loop(
    correlator: Arc<Correlator>,
    store: Arc<IndexedStore>,
    pending_ttl: Duration,
    sweep_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(sweep_interval) => {}
        }
        if *shutdown_rx.borrow() {
            break;
        }
        let links = correlator.sweep_expired(pending_ttl);
        if !links.is_empty() {
            store.apply_peer_links(links);
        }
    }
}
