//! Logger setup

use crate::config::LoggingConfig;
use std::path::Path;

/// Initialise log4rs from the configured file, or env_logger (`RUST_LOG`,
/// default `info`) when the file is missing or unusable
pub fn init_logging(config: &LoggingConfig) {
    if Path::new(&config.config_file).exists() {
        match log4rs::init_file(&config.config_file, Default::default()) {
            Ok(()) => return,
            Err(e) => eprintln!("Failed to load log config {}: {}", config.config_file, e),
        }
    }
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
