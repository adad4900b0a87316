use std::env::current_dir;
use std::sync::Arc;

use anyhow::{Context, Error};
use tracing::{error, info, trace, warn};

use crate::repost::actions::ActionExecutor;
use crate::repost::backfill::run_backfill;
use crate::repost::config_loader::ConfigManager;
use crate::repost::context::PipelineContext;
use crate::repost::database::open_store;
use crate::repost::detection::{run_flush_loop, run_outcome_collector};
use crate::repost::imgur_client::ImgurClient;
use crate::repost::poller::run_live_poller;
use crate::repost::record_store::RecordStore;
use crate::repost::supervisor::{ShutdownTrigger, Supervisor, SupervisorError, unit};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Wires the pipeline together and keeps it running until interrupted.
pub(crate) struct Program {
    config: Arc<ConfigManager>,
}

impl Program {
    pub(crate) fn new(config: Arc<ConfigManager>) -> Self {
        Self { config }
    }

    /// Runs the detector until ctrl-c.
    pub(crate) async fn run(&self) -> Result<(), Error> {
        trace!("Starting repost detector...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        let working_dir = current_dir().context("Failed to get working directory")?;
        trace!("Program Working Directory: {}", working_dir.display());

        let connection = self.config.connection();
        trace!("Feed client id: {}", "*".repeat(connection.feed.client_id.len()));

        let client = Arc::new(ImgurClient::new(connection.feed.clone()).context("Failed to build HTTP client")?);
        let backend = open_store(&connection.store).context("Failed to open durable store")?;
        let ctx = PipelineContext::new(self.config.clone(), backend, client.clone(), client);

        let (trigger, signal) = ShutdownTrigger::new();
        tokio::spawn(RecordStore::load_until_ready(ctx.store.clone(), signal));
        Self::install_signal_handler(trigger.clone());

        let mut supervisor = Supervisor::new(trigger);
        Self::register_units(&mut supervisor, &ctx)?;

        info!(backend = ctx.store.backend_name(), "Repost detector running");
        supervisor.run().await;

        let pending = ctx.actions.failed_count();
        if pending > 0 {
            warn!(pending, "Exiting with failed actions still queued");
        }
        info!("Repost detector stopped");
        Ok(())
    }

    fn register_units(supervisor: &mut Supervisor, ctx: &Arc<PipelineContext>) -> Result<(), SupervisorError> {
        let config = ctx.config.clone();
        supervisor.register(
            "config_watcher",
            unit(move |signal| {
                let config = config.clone();
                async move {
                    config
                        .watch(signal)
                        .await
                        .map_err(|e| SupervisorError::Unit(e.to_string()))
                }
            }),
        )?;

        let pool = ctx.match_pool.clone();
        supervisor.register(
            "match_dispatcher",
            unit(move |signal| {
                let pool = pool.clone();
                async move { pool.run(signal).await.map_err(|e| SupervisorError::Unit(e.to_string())) }
            }),
        )?;

        let shared = ctx.clone();
        supervisor.register(
            "outcome_collector",
            unit(move |signal| {
                let ctx = shared.clone();
                async move {
                    run_outcome_collector(ctx, signal).await;
                    Ok(())
                }
            }),
        )?;

        let shared = ctx.clone();
        supervisor.register(
            "live_poller",
            unit(move |signal| {
                let ctx = shared.clone();
                async move {
                    run_live_poller(ctx, signal).await;
                    Ok(())
                }
            }),
        )?;

        let shared = ctx.clone();
        supervisor.register(
            "backfill",
            unit(move |signal| {
                let ctx = shared.clone();
                async move {
                    run_backfill(ctx, signal).await;
                    Ok(())
                }
            }),
        )?;

        let shared = ctx.clone();
        supervisor.register(
            "detection_flush",
            unit(move |signal| {
                let ctx = shared.clone();
                async move {
                    run_flush_loop(ctx, signal).await;
                    Ok(())
                }
            }),
        )?;

        let actions = ctx.actions.clone();
        supervisor.register(
            "action_retry",
            unit(move |signal| {
                let actions = actions.clone();
                async move {
                    ActionExecutor::run_retry_loop(actions, signal).await;
                    Ok(())
                }
            }),
        )?;

        Ok(())
    }

    fn install_signal_handler(trigger: ShutdownTrigger) {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, shutting down...");
                    trigger.trigger();
                }
                Err(e) => error!("Unable to listen for shutdown signal: {}", e),
            }
        });
    }
}
