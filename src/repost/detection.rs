//! Detection queue: collects match outcomes and flushes them into actions.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::repost::context::PipelineContext;
use crate::repost::logger::LogEntryType;
use crate::repost::match_pool::MatchOutcome;
use crate::repost::record_store::{GALLERY_BASE_URL, ImageRecord};
use crate::repost::supervisor::ShutdownSignal;

/// A candidate image and the earlier records it matched, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepostDetection {
    pub candidate_image_id: String,
    pub candidate_fingerprint: String,
    pub matches: Vec<ImageRecord>,
}

impl RepostDetection {
    pub fn gallery_url(&self) -> String {
        format!("{}/{}", GALLERY_BASE_URL, self.candidate_image_id)
    }

    /// Values substituted into the comment template.
    pub fn comment_values(&self) -> Vec<String> {
        vec![self.matches.len().to_string(), self.candidate_fingerprint.clone()]
    }
}

#[derive(Debug, Default)]
pub struct DetectionQueue {
    pending: Mutex<Vec<RepostDetection>>,
}

impl DetectionQueue {
    pub fn push(&self, detection: RepostDetection) {
        self.pending.lock().push(detection);
    }

    pub fn drain(&self) -> Vec<RepostDetection> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turn one match outcome into a queued detection, if it found anything.
pub fn record_outcome(ctx: &PipelineContext, outcome: MatchOutcome) {
    let MatchOutcome { job, result } = outcome;
    match result {
        Ok(matches) if matches.is_empty() => {
            debug!(trace_id = %job.trace_id, image_id = %job.image_id, "No matches");
        }
        Ok(matches) => {
            info!(
                entry_type = %LogEntryType::Match,
                trace_id = %job.trace_id,
                image_id = %job.image_id,
                matches = matches.len(),
                "Queued repost detection"
            );
            ctx.stats.reposts_found.fetch_add(1, Ordering::Relaxed);
            ctx.detections.push(RepostDetection {
                candidate_image_id: job.image_id,
                candidate_fingerprint: job.fingerprint,
                matches,
            });
        }
        Err(e) => {
            error!(trace_id = %job.trace_id, image_id = %job.image_id, "Match failed: {}", e);
        }
    }
}

/// Drain match outcomes into the detection queue until shutdown.
pub async fn run_outcome_collector(ctx: Arc<PipelineContext>, mut shutdown: ShutdownSignal) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                // Keep whatever already finished.
                while let Ok(outcome) = ctx.outcomes.try_recv() {
                    record_outcome(&ctx, outcome);
                }
                info!("Outcome collector received shutdown signal");
                return;
            }
            outcome = ctx.outcomes.recv_async() => match outcome {
                Ok(outcome) => record_outcome(&ctx, outcome),
                Err(_) => {
                    warn!("Match outcome channel closed");
                    return;
                }
            }
        }
    }
}

/// Act on every queued detection. Returns how many were flushed.
pub async fn flush_detections(ctx: &PipelineContext) -> usize {
    let detections = ctx.detections.drain();
    if detections.is_empty() {
        return 0;
    }

    let config = ctx.config.current();
    info!(count = detections.len(), "Flushing repost detections");

    for detection in &detections {
        info!(
            entry_type = %LogEntryType::Action,
            image_id = %detection.candidate_image_id,
            "Found reposted image: {}",
            detection.gallery_url()
        );
        for original in &detection.matches {
            info!(image_id = %detection.candidate_image_id, "Original: {}", original.gallery_url());
        }

        if config.leave_downvote {
            ctx.actions.downvote(&detection.candidate_image_id).await;
        }
        if config.leave_comment {
            ctx.actions
                .comment(&detection.candidate_image_id, detection.comment_values())
                .await;
        }
        if config.log_reposts {
            let log = ctx.repost_log.clone();
            let path = config.repost_log_path.clone();
            let entry = detection.clone();
            match tokio::task::spawn_blocking(move || log.append(&path, &entry)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Failed to write repost log: {}", e),
                Err(e) => error!("Repost log task failed: {}", e),
            }
        }
    }

    detections.len()
}

/// Flush the detection queue every `flush_interval`, and once more on shutdown.
pub async fn run_flush_loop(ctx: Arc<PipelineContext>, mut shutdown: ShutdownSignal) {
    loop {
        let interval = ctx.config.current().flush_interval;
        let keep_running = shutdown.sleep(interval).await;
        flush_detections(&ctx).await;
        if !keep_running {
            info!("Detection flush loop received shutdown signal");
            return;
        }
    }
}
