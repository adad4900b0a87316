//! Shared state handed to every pipeline unit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::repost::actions::ActionExecutor;
use crate::repost::backfill::BackfillState;
use crate::repost::config_loader::ConfigManager;
use crate::repost::database::DurableStore;
use crate::repost::detection::DetectionQueue;
use crate::repost::feed::{ActionProvider, FeedProvider, Quota};
use crate::repost::match_pool::{MatchOutcome, MatchPool, MatchQueue};
use crate::repost::rate_limiter::RateController;
use crate::repost::record_store::RecordStore;
use crate::repost::repost_log::RepostLog;

/// Counters shown in the periodic status report.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub ingested: AtomicU64,
    pub backfilled: AtomicU64,
    pub reposts_found: AtomicU64,
    pub backfill: RwLock<BackfillState>,
    pub last_quota: RwLock<Option<Quota>>,
}

impl PipelineStats {
    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }

    pub fn backfilled(&self) -> u64 {
        self.backfilled.load(Ordering::Relaxed)
    }

    pub fn reposts_found(&self) -> u64 {
        self.reposts_found.load(Ordering::Relaxed)
    }
}

pub struct PipelineContext {
    pub config: Arc<ConfigManager>,
    pub store: Arc<RecordStore>,
    pub feed: Arc<dyn FeedProvider>,
    pub actions: Arc<ActionExecutor>,
    pub rate: RateController,
    pub match_queue: MatchQueue,
    pub match_pool: Arc<MatchPool>,
    pub outcomes: flume::Receiver<MatchOutcome>,
    pub detections: DetectionQueue,
    pub repost_log: Arc<RepostLog>,
    pub stats: PipelineStats,
}

impl PipelineContext {
    pub fn new(
        config: Arc<ConfigManager>,
        backend: Arc<dyn DurableStore>,
        feed: Arc<dyn FeedProvider>,
        action_provider: Arc<dyn ActionProvider>,
    ) -> Arc<Self> {
        let runtime = config.current();
        let store = Arc::new(RecordStore::new(backend));
        let match_queue = MatchQueue::new(runtime.match_queue_capacity);
        let (outcome_tx, outcomes) = flume::unbounded();
        let match_pool = Arc::new(MatchPool::new(
            config.clone(),
            store.clone(),
            match_queue.clone(),
            outcome_tx,
        ));
        let actions = Arc::new(ActionExecutor::new(action_provider, config.clone()));

        Arc::new(Self {
            config,
            store,
            feed,
            actions,
            rate: RateController::new(),
            match_queue,
            match_pool,
            outcomes,
            detections: DetectionQueue::default(),
            repost_log: Arc::new(RepostLog::new()),
            stats: PipelineStats::default(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::repost::config_loader::RuntimeConfig;
    use crate::repost::database::SqliteStore;
    use crate::repost::feed::testing::{MockActions, MockFeed};

    /// A ready context over an in-memory store and mock providers.
    pub(crate) fn context(
        runtime: RuntimeConfig,
        feed: Arc<MockFeed>,
        actions: Arc<MockActions>,
    ) -> Arc<PipelineContext> {
        let config = Arc::new(ConfigManager::for_tests(runtime));
        let backend = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ctx = PipelineContext::new(config, backend, feed, actions);
        ctx.store.load_all().unwrap();
        ctx
    }
}
