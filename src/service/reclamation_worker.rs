//! Background reclamation of expired uploads
//!
//! The worker wakes up on a fixed interval and asks the registry to evict
//! everything that has expired. A sweep always finishes before the next one
//! can start; a slow sweep pushes the following tick back instead of
//! overlapping with it.

use crate::config::ReclamationConfig;
use crate::registry::ObjectRegistry;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

pub const DEFAULT_RECLAMATION_INTERVAL: Duration = Duration::from_secs(60);

/// Background reclamation worker
pub struct ReclamationWorker {
    registry: Arc<ObjectRegistry>,
    interval: Duration,
}

impl ReclamationWorker {
    pub fn new(registry: Arc<ObjectRegistry>) -> Self {
        Self {
            registry,
            interval: DEFAULT_RECLAMATION_INTERVAL,
        }
    }

    pub fn from_config(registry: Arc<ObjectRegistry>, config: &ReclamationConfig) -> Self {
        Self::new(registry).with_interval(Duration::from_secs(config.interval_secs.max(1)))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the worker as a background task. It runs until the runtime
    /// shuts down or the handle is aborted.
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        info!("File cleanup job scheduled to run every {}s", self.interval.as_secs_f64());

        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    /// One sweep over the registry; returns how many uploads were reclaimed
    pub async fn run_once(&self) -> usize {
        debug!("Running cleanup job...");
        let now = self.registry.now();
        self.registry.evict_expired(now).await
    }
}

/// Start a reclamation worker for `registry` with the configured interval
pub fn start_reclamation_worker(
    registry: Arc<ObjectRegistry>,
    config: &ReclamationConfig,
) -> tokio::task::JoinHandle<()> {
    ReclamationWorker::from_config(registry, config).start_background()
}
