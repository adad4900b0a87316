//! Repost detection pipeline
//!
//! Images flow from the feed through fingerprinting into the record store,
//! then through the match pool into the detection queue, which finally
//! drives the moderation actions.

pub mod actions;
pub mod backfill;
pub mod config_loader;
pub mod context;
pub mod database;
pub mod detection;
pub mod feed;
pub mod fingerprint;
pub mod imgur_client;
pub mod logger;
pub mod match_pool;
pub mod matcher;
pub mod poller;
pub mod rate_limiter;
pub mod record_store;
pub mod repost_log;
pub mod supervisor;

pub use config_loader::{ConfigError, ConfigManager, RuntimeConfig};
pub use context::PipelineContext;
pub use supervisor::{ShutdownTrigger, Supervisor};
