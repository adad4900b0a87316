//! Downvote and comment actions with an unbounded retry list.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::repost::config_loader::ConfigManager;
use crate::repost::feed::{ActionProvider, ProviderResult, VoteDirection};
use crate::repost::supervisor::ShutdownSignal;

const PLACEHOLDER: &str = "{}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Downvote,
    Comment { values: Vec<String> },
}

/// An action that failed and is waiting for the next retry flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAction {
    pub kind: ActionKind,
    pub image_id: String,
}

/// Fill `{}` placeholders in order.
///
/// A template without placeholders is used as is. If the number of values does
/// not match the number of placeholders the raw template is returned.
pub fn build_comment(template: &str, values: &[String]) -> String {
    let placeholders = template.matches(PLACEHOLDER).count();
    if placeholders == 0 {
        return template.to_string();
    }
    if placeholders != values.len() {
        warn!(
            placeholders,
            values = values.len(),
            "Comment template does not match the number of values, using raw template"
        );
        return template.to_string();
    }

    let mut message = String::with_capacity(template.len());
    let mut values = values.iter();
    let mut parts = template.split(PLACEHOLDER).peekable();
    while let Some(part) = parts.next() {
        message.push_str(part);
        if parts.peek().is_some() {
            if let Some(value) = values.next() {
                message.push_str(value);
            }
        }
    }
    message
}

pub struct ActionExecutor {
    provider: Arc<dyn ActionProvider>,
    config: Arc<ConfigManager>,
    failed: Mutex<Vec<FailedAction>>,
}

impl ActionExecutor {
    pub fn new(provider: Arc<dyn ActionProvider>, config: Arc<ConfigManager>) -> Self {
        Self {
            provider,
            config,
            failed: Mutex::new(Vec::new()),
        }
    }

    async fn attempt(&self, action: &FailedAction) -> ProviderResult<()> {
        match &action.kind {
            ActionKind::Downvote => self.provider.vote(&action.image_id, VoteDirection::Down).await,
            ActionKind::Comment { values } => {
                let message = build_comment(&self.config.current().comment_template, values);
                self.provider.post_comment(&action.image_id, &message).await
            }
        }
    }

    async fn perform(&self, action: FailedAction) -> bool {
        match self.attempt(&action).await {
            Ok(()) => {
                debug!(image_id = %action.image_id, kind = ?action.kind, "Action applied");
                true
            }
            Err(e) => {
                error!(image_id = %action.image_id, "Action failed, queued for retry: {}", e);
                self.push_failed(vec![action]);
                false
            }
        }
    }

    fn push_failed(&self, actions: Vec<FailedAction>) {
        let mut failed = self.failed.lock();
        failed.extend(actions);
        let limit = self.config.current().failed_action_warning;
        if failed.len() > limit {
            warn!(pending = failed.len(), limit, "Failed action list is growing");
        }
    }

    pub async fn downvote(&self, image_id: &str) -> bool {
        self.perform(FailedAction {
            kind: ActionKind::Downvote,
            image_id: image_id.to_string(),
        })
        .await
    }

    pub async fn comment(&self, image_id: &str, values: Vec<String>) -> bool {
        self.perform(FailedAction {
            kind: ActionKind::Comment { values },
            image_id: image_id.to_string(),
        })
        .await
    }

    pub fn failed(&self) -> Vec<FailedAction> {
        self.failed.lock().clone()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.lock().len()
    }

    /// Retry every failed action once. Successes are removed, failures kept.
    ///
    /// Returns the number of actions that succeeded.
    pub async fn flush_failed(&self) -> usize {
        let pending = std::mem::take(&mut *self.failed.lock());
        if pending.is_empty() {
            return 0;
        }

        let total = pending.len();
        let mut still_failing = Vec::new();
        for action in pending {
            match self.attempt(&action).await {
                Ok(()) => info!(image_id = %action.image_id, kind = ?action.kind, "Retried action succeeded"),
                Err(e) => {
                    warn!(image_id = %action.image_id, "Retry failed: {}", e);
                    still_failing.push(action);
                }
            }
        }

        let succeeded = total - still_failing.len();
        if !still_failing.is_empty() {
            self.push_failed(still_failing);
        }
        succeeded
    }

    /// Flush the failed list every `retry_interval` until shutdown.
    pub async fn run_retry_loop(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        loop {
            let interval = self.config.current().retry_interval;
            if !shutdown.sleep(interval).await {
                info!("Retry loop received shutdown signal");
                return;
            }
            self.flush_failed().await;
        }
    }
}
