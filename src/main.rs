use std::env::consts::{ARCH, FAMILY, OS};
use std::sync::Arc;

use anyhow::Error;
use tracing::trace;

use crate::program::Program;
use crate::repost::logger::init_logger;
use crate::repost::{ConfigError, ConfigManager};

mod program;
mod repost;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config_path = ConfigManager::default_path();
    let config = match ConfigManager::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(ConfigError::MissingFields(fields)) => {
            eprintln!(
                "Config file {} is missing required fields:",
                config_path.display()
            );
            for field in fields {
                eprintln!("  - {}", field);
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to load config {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    // Dropping the guard flushes the file writer, so it lives until exit.
    let _logger = init_logger(&config.connection().logging)?;
    log_system_information();

    Program::new(config).run().await
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
    trace!("CPUS:           \"{}\"", num_cpus::get());
}
