//! Resizable match worker pool
//!
//! This module provides:
//! 1. The bounded match-request queue fed by the poller
//! 2. A dispatcher that snapshots the record set and hands scans to rayon
//! 3. Panic isolation per scan
//! 4. Drain-and-recreate resizing when the configured worker count changes

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, error, info, warn};

use crate::repost::config_loader::ConfigManager;
use crate::repost::matcher::{MatchError, MatchResult, find_matches};
use crate::repost::record_store::{FingerprintJob, ImageRecord, RecordSnapshot, RecordStore};
use crate::repost::supervisor::ShutdownSignal;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to build match pool: {0}")]
    Build(#[from] ThreadPoolBuildError),

    #[error("Match queue closed")]
    QueueClosed,
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Scan function run on a worker thread.
pub type Scanner = Arc<dyn Fn(&FingerprintJob, &RecordSnapshot, u32) -> MatchResult<Vec<ImageRecord>> + Send + Sync>;

/// The result of one scan, sent to the outcome collector.
#[derive(Debug)]
pub struct MatchOutcome {
    pub job: FingerprintJob,
    pub result: MatchResult<Vec<ImageRecord>>,
}

/// Bounded queue of match requests. A full queue blocks the producer.
#[derive(Clone)]
pub struct MatchQueue {
    tx: flume::Sender<FingerprintJob>,
    rx: flume::Receiver<FingerprintJob>,
}

impl MatchQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub async fn enqueue(&self, job: FingerprintJob) -> PoolResult<()> {
        self.tx.send_async(job).await.map_err(|_| PoolError::QueueClosed)
    }

    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    fn receiver(&self) -> flume::Receiver<FingerprintJob> {
        self.rx.clone()
    }
}

/// Counts scans that have been handed to the pool but not finished.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn drained(&self) {
        loop {
            let notified = self.idle.notified();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct LivePool {
    pool: ThreadPool,
    size: usize,
}

pub struct MatchPool {
    config: Arc<ConfigManager>,
    store: Arc<RecordStore>,
    queue: MatchQueue,
    outcomes: flume::Sender<MatchOutcome>,
    scanner: Scanner,
    in_flight: Arc<InFlight>,
    live: Mutex<Option<LivePool>>,
    resizes: AtomicUsize,
}

impl MatchPool {
    pub fn new(
        config: Arc<ConfigManager>,
        store: Arc<RecordStore>,
        queue: MatchQueue,
        outcomes: flume::Sender<MatchOutcome>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            outcomes,
            scanner: Arc::new(find_matches),
            in_flight: Arc::new(InFlight::default()),
            live: Mutex::new(None),
            resizes: AtomicUsize::new(0),
        }
    }

    /// Replace the scan function.
    pub fn with_scanner(mut self, scanner: Scanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// Current number of worker threads, zero before the first build.
    pub fn size(&self) -> usize {
        self.live.lock().as_ref().map_or(0, |live| live.size)
    }

    /// How many times the pool was torn down and rebuilt.
    pub fn resizes(&self) -> usize {
        self.resizes.load(Ordering::SeqCst)
    }

    fn build_pool(size: usize) -> PoolResult<ThreadPool> {
        Ok(ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("match-worker-{}", i))
            .build()?)
    }

    /// Make sure the live pool has the configured size, draining first if not.
    async fn ensure_size(&self) -> PoolResult<()> {
        let desired = self.config.current().match_worker_count.max(1);
        let current = self.size();
        if current == desired {
            return Ok(());
        }

        if current != 0 {
            info!(from = current, to = desired, "Resizing match pool, draining in-flight scans");
            self.in_flight.drained().await;
        }

        let pool = Self::build_pool(desired)?;
        let previous = self.live.lock().replace(LivePool { pool, size: desired });
        if previous.is_some() {
            self.resizes.fetch_add(1, Ordering::SeqCst);
        }
        info!(workers = desired, "Match pool ready");
        Ok(())
    }

    fn dispatch(&self, job: FingerprintJob) {
        let cutoff = self.config.current().hamming_cutoff;
        let snapshot = self.store.snapshot();
        let scanner = self.scanner.clone();
        let outcomes = self.outcomes.clone();
        let in_flight = self.in_flight.clone();

        in_flight.start();
        let live = self.live.lock();
        let Some(live) = live.as_ref() else {
            in_flight.finish();
            error!(trace_id = %job.trace_id, "No match pool available");
            return;
        };

        live.pool.spawn(move || {
            let scanned = catch_unwind(AssertUnwindSafe(|| {
                scanner(&job, &snapshot, cutoff)
            }));
            let result = scanned.unwrap_or_else(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(MatchError::Panicked(message))
            });

            in_flight.finish();
            if outcomes.send(MatchOutcome { job, result }).is_err() {
                warn!("Match outcome receiver dropped");
            }
        });
    }

    /// Dispatcher loop. Returns on shutdown or when the queue closes.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) -> PoolResult<()> {
        let jobs = self.queue.receiver();
        let mut reloads = self.config.subscribe();

        self.store.wait_ready().await;
        info!("Match dispatcher started");

        loop {
            self.ensure_size().await?;

            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Match dispatcher received shutdown signal");
                    self.in_flight.drained().await;
                    return Ok(());
                }
                reload = reloads.recv() => {
                    if let Err(broadcast::error::RecvError::Closed) = reload {
                        reloads = self.config.subscribe();
                    }
                }
                job = jobs.recv_async() => {
                    let Ok(job) = job else {
                        return Err(PoolError::QueueClosed);
                    };
                    // A reload may have landed while we were waiting.
                    self.ensure_size().await?;
                    debug!(trace_id = %job.trace_id, image_id = %job.image_id, "Dispatching match scan");
                    self.dispatch(job);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repost::config_loader::{HashSize, RuntimeConfig};
    use crate::repost::database::SqliteStore;
    use crate::repost::record_store::tests::record;
    use crate::repost::supervisor::ShutdownTrigger;
    use std::collections::HashSet;
    use std::time::Duration;
    use uuid::Uuid;

    fn job(i: usize) -> FingerprintJob {
        FingerprintJob {
            trace_id: Uuid::new_v4(),
            fingerprint: "0f0f0f0f0f0f0f0f".to_string(),
            hash_size: HashSize::Hash16,
            image_id: format!("job{}", i),
            author: "someone".to_string(),
        }
    }

    fn setup(workers: usize) -> (Arc<ConfigManager>, Arc<RecordStore>) {
        let config = Arc::new(ConfigManager::for_tests(RuntimeConfig {
            match_worker_count: workers,
            ..RuntimeConfig::default()
        }));
        let store = Arc::new(RecordStore::new(Arc::new(SqliteStore::open_in_memory().unwrap())));
        store.load_all().unwrap();
        store.append(record("orig", "alice", "0f0f0f0f0f0f0f0f", 0)).unwrap();
        (config, store)
    }

    fn slow_scanner() -> Scanner {
        Arc::new(|job: &FingerprintJob, snapshot: &RecordSnapshot, cutoff: u32| {
            std::thread::sleep(Duration::from_millis(5));
            find_matches(job, snapshot, cutoff)
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resize_processes_every_job_exactly_once() {
        let (config, store) = setup(2);
        let queue = MatchQueue::new(256);
        let (outcome_tx, outcome_rx) = flume::unbounded();
        let pool = Arc::new(
            MatchPool::new(config.clone(), store, queue.clone(), outcome_tx).with_scanner(slow_scanner()),
        );
        let (trigger, signal) = ShutdownTrigger::new();
        let dispatcher = tokio::spawn(pool.clone().run(signal));

        let mut expected = HashSet::new();
        for i in 0..40 {
            let job = job(i);
            expected.insert(job.trace_id);
            queue.enqueue(job).await.unwrap();
        }

        // Resize while work is queued and in flight.
        tokio::time::sleep(Duration::from_millis(20)).await;
        config.replace(RuntimeConfig {
            match_worker_count: 4,
            ..RuntimeConfig::default()
        });

        for i in 40..80 {
            let job = job(i);
            expected.insert(job.trace_id);
            queue.enqueue(job).await.unwrap();
        }

        let mut seen = HashSet::new();
        for _ in 0..80 {
            let outcome = tokio::time::timeout(Duration::from_secs(10), outcome_rx.recv_async())
                .await
                .unwrap()
                .unwrap();
            assert!(seen.insert(outcome.job.trace_id), "job processed twice");
            assert_eq!(outcome.result.unwrap().len(), 1);
        }
        assert_eq!(seen, expected);
        assert!(outcome_rx.try_recv().is_err());
        assert_eq!(pool.size(), 4);
        assert_eq!(pool.resizes(), 1);

        trigger.trigger();
        dispatcher.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_scan_does_not_abort_others() {
        let (config, store) = setup(2);
        let queue = MatchQueue::new(16);
        let (outcome_tx, outcome_rx) = flume::unbounded();
        let scanner: Scanner = Arc::new(|job: &FingerprintJob, snapshot: &RecordSnapshot, cutoff: u32| {
            if job.image_id == "job1" {
                panic!("corrupt snapshot");
            }
            find_matches(job, snapshot, cutoff)
        });
        let pool = Arc::new(MatchPool::new(config, store, queue.clone(), outcome_tx).with_scanner(scanner));
        let (trigger, signal) = ShutdownTrigger::new();
        let dispatcher = tokio::spawn(pool.clone().run(signal));

        for i in 0..3 {
            queue.enqueue(job(i)).await.unwrap();
        }

        let mut failed = 0;
        let mut succeeded = 0;
        for _ in 0..3 {
            let outcome = tokio::time::timeout(Duration::from_secs(5), outcome_rx.recv_async())
                .await
                .unwrap()
                .unwrap();
            match outcome.result {
                Err(MatchError::Panicked(message)) => {
                    assert_eq!(outcome.job.image_id, "job1");
                    assert!(message.contains("corrupt snapshot"));
                    failed += 1;
                }
                Ok(_) => succeeded += 1,
                Err(e) => panic!("unexpected error {}", e),
            }
        }
        assert_eq!((failed, succeeded), (1, 2));
        assert_eq!(pool.in_flight(), 0);

        trigger.trigger();
        dispatcher.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_job_keeps_its_width_across_hash_size_reload() {
        let (config, store) = setup(2);
        let mut wide = record("orig64", "carol", "ffffffffffffffff", 1);
        wide.hash64 = "ab".repeat(32);
        store.append(wide).unwrap();

        let queue = MatchQueue::new(16);
        let (outcome_tx, outcome_rx) = flume::unbounded();
        let pool = Arc::new(MatchPool::new(config.clone(), store, queue.clone(), outcome_tx));

        // Enqueued at 16-bit width, then the live width changes before dispatch.
        queue.enqueue(job(0)).await.unwrap();
        config.replace(RuntimeConfig {
            hash_size: HashSize::Hash64,
            ..RuntimeConfig::default()
        });

        let (trigger, signal) = ShutdownTrigger::new();
        let dispatcher = tokio::spawn(pool.clone().run(signal));

        let outcome = tokio::time::timeout(Duration::from_secs(5), outcome_rx.recv_async())
            .await
            .unwrap()
            .unwrap();
        let found = outcome.result.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].image_id, "orig");

        trigger.trigger();
        dispatcher.await.unwrap().unwrap();
    }

    #[test]
    fn test_queue_depth() {
        let queue = MatchQueue::new(4);
        assert_eq!(queue.depth(), 0);
        queue.tx.try_send(job(0)).unwrap();
        assert_eq!(queue.depth(), 1);
    }
}
