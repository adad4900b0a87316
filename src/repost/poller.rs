//! Live feed poller
//!
//! Each cycle:
//! 1. Refreshes the quota and recomputes the delay
//! 2. Lists the newest page and filters albums and excluded titles
//! 3. Fingerprints, persists and enqueues every unseen item
//! 4. Emits a status report every few cycles, then sleeps

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::repost::config_loader::RuntimeConfig;
use crate::repost::context::PipelineContext;
use crate::repost::feed::{FeedItem, ProviderError};
use crate::repost::fingerprint::{FingerprintError, fingerprint_all};
use crate::repost::logger::LogEntryType;
use crate::repost::match_pool::PoolError;
use crate::repost::record_store::{FingerprintJob, ImageRecord, StoreError};
use crate::repost::supervisor::ShutdownSignal;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Feed error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] PoolError),

    #[error("Blocking task failed: {0}")]
    Join(#[from] JoinError),
}

pub type PollResult<T> = Result<T, PollError>;

/// Counts for one fetched page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageSummary {
    pub listed: usize,
    pub filtered: usize,
    pub inserted: usize,
    pub failed: usize,
}

/// Albums and items whose title contains an exclusion term are skipped.
pub fn is_excluded(item: &FeedItem, terms: &[String]) -> bool {
    if item.is_album {
        return true;
    }
    match &item.title {
        Some(title) => {
            let title = title.to_lowercase();
            terms.iter().any(|term| title.contains(term.as_str()))
        }
        None => false,
    }
}

/// Fetch, fingerprint and store one item.
///
/// Returns the stored record, or `None` if the id was already known.
pub async fn ingest_item(ctx: &PipelineContext, item: &FeedItem) -> PollResult<Option<ImageRecord>> {
    if ctx.store.contains(&item.id) {
        return Ok(None);
    }

    let bytes = ctx.feed.fetch_image(&item.link).await?;
    let prints = tokio::task::spawn_blocking(move || fingerprint_all(&bytes)).await??;

    let record = ImageRecord {
        image_id: item.id.clone(),
        url: item.link.clone(),
        author: item.author.clone(),
        submitted_at: item.submitted_at,
        hash16: prints.hash16,
        hash64: prints.hash64,
        hash256: prints.hash256,
    };

    let store = ctx.store.clone();
    let to_store = record.clone();
    let inserted = tokio::task::spawn_blocking(move || store.append(to_store)).await??;

    Ok(inserted.then_some(record))
}

/// Process one page. Live pages enqueue match jobs; backfill pages only store.
pub async fn poll_page(ctx: &PipelineContext, page: u32, enqueue: bool) -> PollResult<PageSummary> {
    let config = ctx.config.current();
    let feed = ctx.config.connection().feed.clone();
    let items = ctx.feed.list_page(&feed.section, &feed.sort, page).await?;

    let mut summary = PageSummary {
        listed: items.len(),
        ..Default::default()
    };

    for item in items
        .iter()
        .filter(|item| !is_excluded(item, &config.title_exclusion_terms))
    {
        summary.filtered += 1;
        match ingest_item(ctx, item).await {
            Ok(Some(record)) => {
                summary.inserted += 1;
                if enqueue {
                    info!(entry_type = %LogEntryType::Ingest, image_id = %record.image_id, "Insert {}", record.url);
                    ctx.stats.ingested.fetch_add(1, Ordering::Relaxed);
                    ctx.match_queue
                        .enqueue(FingerprintJob::for_record(&record, config.hash_size))
                        .await?;
                } else {
                    info!(entry_type = %LogEntryType::Ingest, image_id = %record.image_id, page, "Backfill insert {}", record.url);
                    ctx.stats.backfilled.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(None) => {}
            Err(e) => {
                summary.failed += 1;
                warn!(image_id = %item.id, "Skipping item: {}", e);
            }
        }
    }

    ctx.store.check_capacity(config.record_capacity_warning);
    Ok(summary)
}

/// Refresh the quota and return the delay to sleep after this cycle.
pub async fn refresh_delay(ctx: &PipelineContext, config: &RuntimeConfig) -> Duration {
    match ctx.feed.quota().await {
        Ok(quota) => {
            *ctx.stats.last_quota.write() = Some(quota);
            ctx.rate.update(&quota, Utc::now(), config.min_request_delay)
        }
        Err(e) => {
            warn!("Failed to refresh quota, keeping previous delay: {}", e);
            ctx.rate.current_delay(config.min_request_delay)
        }
    }
}

/// Log the current pipeline state.
pub fn status_report(ctx: &PipelineContext, config: &RuntimeConfig, delay: Duration) {
    let quota = *ctx.stats.last_quota.read();
    let minutes_to_reset = quota.map(|q| (q.reset_at - Utc::now()).num_minutes());
    let backfill = *ctx.stats.backfill.read();

    info!(
        entry_type = %LogEntryType::System,
        pending_jobs = ctx.match_queue.depth(),
        in_flight = ctx.match_pool.in_flight(),
        records = ctx.store.len(),
        ingested = ctx.stats.ingested(),
        backfilled = ctx.stats.backfilled(),
        reposts_found = ctx.stats.reposts_found(),
        pending_detections = ctx.detections.len(),
        failed_actions = ctx.actions.failed_count(),
        backfill = %backfill,
        "Current stats"
    );
    info!(
        entry_type = %LogEntryType::System,
        config_version = config.version,
        leave_comment = config.leave_comment,
        leave_downvote = config.leave_downvote,
        flush_interval_secs = config.flush_interval.as_secs(),
        match_workers = ctx.match_pool.size(),
        remaining_credits = quota.map(|q| q.remaining),
        minutes_to_reset,
        delay_secs = delay.as_secs_f64(),
        rate_limited = delay > config.min_request_delay,
        "Current settings"
    );
}

/// Live polling loop. Returns only on shutdown.
pub async fn run_live_poller(ctx: Arc<PipelineContext>, mut shutdown: ShutdownSignal) {
    tokio::select! {
        _ = shutdown.wait() => return,
        _ = ctx.store.wait_ready() => {}
    }
    info!("Live poller started");

    let mut cycle: u64 = 0;
    loop {
        let config = ctx.config.current();
        let delay = refresh_delay(&ctx, &config).await;

        match poll_page(&ctx, 0, true).await {
            Ok(summary) => debug!(?summary, "Poll cycle complete"),
            Err(e) => warn!("Skipping poll cycle: {}", e),
        }

        cycle += 1;
        if cycle % u64::from(config.status_interval_cycles.max(1)) == 0 {
            status_report(&ctx, &config, delay);
        }

        if !shutdown.sleep(delay).await {
            info!("Live poller received shutdown signal");
            return;
        }
    }
}
