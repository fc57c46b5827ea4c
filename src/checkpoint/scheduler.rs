//! Periodic checkpointing, decoupled from the append path.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::checkpoint::service::CheckpointService;
use crate::checkpoint::Checkpoint;
use crate::error::Result;

pub struct CheckpointScheduler {
    service: Arc<CheckpointService>,
    interval: Duration,
}

impl CheckpointScheduler {
    pub fn new(service: Arc<CheckpointService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run one scheduling round. Returns the new checkpoint, or `None` when
    /// the chain has not grown since the latest one.
    pub async fn tick(&self) -> Result<Option<Checkpoint>> {
        let sequence = self.service.store().get_sequence().await;
        if sequence == 0 {
            debug!("Audit chain is empty, skipping checkpoint");
            return Ok(None);
        }

        if let Some(latest) = self.service.store().get_latest_checkpoint().await? {
            if latest.last_sequence >= sequence {
                debug!("No new entries since checkpoint {}, skipping", latest.id);
                return Ok(None);
            }
        }

        self.service.create_checkpoint().await.map(Some)
    }

    /// Spawn the scheduling loop. It stops once `shutdown` flips to true or
    /// its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Checkpoint scheduler started (every {}s)",
                self.interval.as_secs()
            );
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            error!("Scheduled checkpoint failed: {}", e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Checkpoint scheduler stopped");
        })
    }
}
