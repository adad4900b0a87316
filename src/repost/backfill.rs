//! One-shot backfill over older feed pages.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::repost::config_loader::BackfillSettings;
use crate::repost::context::PipelineContext;
use crate::repost::poller::poll_page;
use crate::repost::supervisor::ShutdownSignal;

/// How often a disabled or completed backfill re-checks its settings.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackfillState {
    #[default]
    Disabled,
    Running {
        page: u32,
    },
    Completed,
}

impl std::fmt::Display for BackfillState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackfillState::Disabled => write!(f, "disabled"),
            BackfillState::Running { page } => write!(f, "page {}", page),
            BackfillState::Completed => write!(f, "completed"),
        }
    }
}

/// Position within `[start_page, start_page + depth)`.
#[derive(Debug, Clone)]
pub struct BackfillCursor {
    start_page: u32,
    depth: u32,
    next_page: u32,
    state: BackfillState,
}

impl BackfillCursor {
    pub fn new(settings: BackfillSettings) -> Self {
        Self {
            start_page: settings.start_page,
            depth: settings.depth,
            next_page: settings.start_page,
            state: BackfillState::Disabled,
        }
    }

    pub fn state(&self) -> BackfillState {
        self.state
    }

    /// Page to fetch next under `settings`, or `None` when there is nothing to do.
    ///
    /// A changed start page or depth restarts the run, even after completion.
    pub fn plan(&mut self, settings: BackfillSettings) -> Option<u32> {
        if settings.start_page != self.start_page || settings.depth != self.depth {
            info!(
                start_page = settings.start_page,
                depth = settings.depth,
                "Backfill range changed, restarting"
            );
            self.start_page = settings.start_page;
            self.depth = settings.depth;
            self.next_page = settings.start_page;
        }

        if !settings.enabled {
            self.state = BackfillState::Disabled;
            return None;
        }

        let end = self.start_page.saturating_add(self.depth);
        if self.next_page >= end {
            if self.state != BackfillState::Completed {
                info!(start_page = self.start_page, depth = self.depth, "Backfill completed");
            }
            self.state = BackfillState::Completed;
            return None;
        }

        self.state = BackfillState::Running { page: self.next_page };
        Some(self.next_page)
    }

    /// Move past the page returned by the last [`plan`](Self::plan).
    pub fn advance(&mut self) {
        self.next_page = self.next_page.saturating_add(1);
    }
}

/// Fetch the next planned page, if any. The cursor only moves on success.
///
/// Returns the page attempted.
pub async fn backfill_step(ctx: &PipelineContext, cursor: &mut BackfillCursor, settings: BackfillSettings) -> Option<u32> {
    let page = cursor.plan(settings);
    *ctx.stats.backfill.write() = cursor.state();

    let page = page?;
    match poll_page(ctx, page, false).await {
        Ok(summary) => {
            debug!(page, ?summary, "Backfilled page");
            cursor.advance();
        }
        // Same page is retried next round.
        Err(e) => warn!(page, "Backfill page failed: {}", e),
    }
    Some(page)
}

/// Backfill loop. Never finishes on its own; idles while disabled or done.
pub async fn run_backfill(ctx: Arc<PipelineContext>, mut shutdown: ShutdownSignal) {
    tokio::select! {
        _ = shutdown.wait() => return,
        _ = ctx.store.wait_ready() => {}
    }

    let mut cursor = BackfillCursor::new(ctx.config.current().backfill);
    loop {
        let config = ctx.config.current();
        let pause = match backfill_step(&ctx, &mut cursor, config.backfill).await {
            Some(_) => ctx.rate.current_delay(config.min_request_delay),
            None => IDLE_CHECK_INTERVAL,
        };

        if !shutdown.sleep(pause).await {
            info!("Backfill received shutdown signal");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repost::config_loader::RuntimeConfig;
    use crate::repost::context::testing::context;
    use crate::repost::feed::testing::{MockActions, MockFeed, item, png};
    use std::sync::atomic::Ordering;

    fn settings(enabled: bool, start_page: u32, depth: u32) -> BackfillSettings {
        BackfillSettings {
            enabled,
            depth,
            start_page,
        }
    }

    fn run_to_end(cursor: &mut BackfillCursor, s: BackfillSettings) -> Vec<u32> {
        let mut pages = Vec::new();
        while let Some(page) = cursor.plan(s) {
            pages.push(page);
            cursor.advance();
        }
        pages
    }

    #[test]
    fn test_walks_range_then_completes() {
        let s = settings(true, 2, 3);
        let mut cursor = BackfillCursor::new(s);
        assert_eq!(run_to_end(&mut cursor, s), vec![2, 3, 4]);
        assert_eq!(cursor.state(), BackfillState::Completed);
        assert_eq!(cursor.plan(s), None);
    }

    #[test]
    fn test_disabled_pauses_and_resumes() {
        let on = settings(true, 1, 5);
        let off = settings(false, 1, 5);
        let mut cursor = BackfillCursor::new(on);

        assert_eq!(cursor.plan(on), Some(1));
        cursor.advance();
        assert_eq!(cursor.plan(off), None);
        assert_eq!(cursor.state(), BackfillState::Disabled);
        assert_eq!(cursor.plan(on), Some(2));
        assert_eq!(cursor.state(), BackfillState::Running { page: 2 });
    }

    #[test]
    fn test_start_page_change_restarts_mid_run() {
        let mut cursor = BackfillCursor::new(settings(true, 1, 10));
        cursor.plan(settings(true, 1, 10));
        cursor.advance();
        cursor.plan(settings(true, 1, 10));
        cursor.advance();

        assert_eq!(cursor.plan(settings(true, 7, 10)), Some(7));
    }

    #[test]
    fn test_depth_change_restarts_after_completion() {
        let s = settings(true, 1, 2);
        let mut cursor = BackfillCursor::new(s);
        run_to_end(&mut cursor, s);
        assert_eq!(cursor.state(), BackfillState::Completed);

        let deeper = settings(true, 1, 4);
        assert_eq!(run_to_end(&mut cursor, deeper), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_depth_completes_immediately() {
        let s = settings(true, 1, 0);
        let mut cursor = BackfillCursor::new(s);
        assert_eq!(cursor.plan(s), None);
        assert_eq!(cursor.state(), BackfillState::Completed);
    }

    #[tokio::test]
    async fn test_failed_page_is_retried_before_moving_on() {
        let feed = Arc::new(
            MockFeed::default()
                .with_page(1, vec![(item("a", "alice", None), png(1))])
                .with_page(2, vec![(item("b", "bob", None), png(2))]),
        );
        let ctx = context(RuntimeConfig::default(), feed.clone(), Arc::new(MockActions::default()));
        let s = settings(true, 1, 2);
        let mut cursor = BackfillCursor::new(s);

        feed.fail_listing.store(true, Ordering::SeqCst);
        assert_eq!(backfill_step(&ctx, &mut cursor, s).await, Some(1));
        assert_eq!(backfill_step(&ctx, &mut cursor, s).await, Some(1));
        assert!(!ctx.store.contains("a"));

        feed.fail_listing.store(false, Ordering::SeqCst);
        assert_eq!(backfill_step(&ctx, &mut cursor, s).await, Some(1));
        assert_eq!(backfill_step(&ctx, &mut cursor, s).await, Some(2));
        assert_eq!(backfill_step(&ctx, &mut cursor, s).await, None);

        assert_eq!(feed.requested_pages.lock().as_slice(), &[1, 1, 1, 2]);
        assert!(ctx.store.contains("a"));
        assert!(ctx.store.contains("b"));
        assert_eq!(*ctx.stats.backfill.read(), BackfillState::Completed);
    }
}
