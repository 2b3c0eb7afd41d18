//! Background eviction of registry entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::registry::Registry;

/// Periodic sweep that keeps the registry bounded.
pub struct Evictor {
    registry: Arc<Registry>,
    interval: Duration,
}

impl Evictor {
    /// Create an evictor using the registry's configured interval.
    pub fn new(registry: Arc<Registry>) -> Self {
        let interval = registry.eviction_config().interval();
        Self { registry, interval }
    }

    /// Override the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start sweeping on the current tokio runtime.
    ///
    /// The first sweep runs one interval after the start. The task stops when
    /// the returned handle is shut down or dropped.
    pub fn spawn(self) -> EvictorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let Evictor { registry, interval } = self;

        info!(interval_secs = interval.as_secs(), "Starting registry evictor");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // A full sweep walks every shard; keep it off the async workers.
                        let registry = registry.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || registry.sweep()).await {
                            warn!(error = %e, "Registry sweep failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Registry evictor stopped");
                        break;
                    }
                }
            }
        });

        EvictorHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Cancellation handle for a running [`Evictor`].
#[derive(Debug)]
pub struct EvictorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EvictorHandle {
    /// Stop the evictor and wait for its task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Registry evictor task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for EvictorHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
