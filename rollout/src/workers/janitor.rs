//! Retention worker that evicts finished jobs

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info};

use crate::scheduler::JobScheduler;

/// Janitor worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Eviction interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Anything holding jobs that expire
pub trait EvictExpired: Send + Sync {
    /// Evict expired jobs, returning how many were removed
    fn evict_expired(&self) -> usize;
}

impl EvictExpired for JobScheduler {
    fn evict_expired(&self) -> usize {
        JobScheduler::evict_expired(self)
    }
}

/// Run the janitor worker
pub async fn run<E, S, F>(
    options: &Options,
    jobs: &E,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    E: EvictExpired + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Janitor worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Janitor worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let evicted = jobs.evict_expired();
        if evicted > 0 {
            info!(evicted, "Evicted expired jobs");
        } else {
            debug!("No expired jobs");
        }
    }
}
