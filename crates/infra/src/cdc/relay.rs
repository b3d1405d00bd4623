use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{CdcNormalizer, ChangeSource, ChangeSourceError};
use crate::publish::PublishError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Source(#[from] ChangeSourceError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub published: usize,
    pub skipped: usize,
}

/// Drives a `ChangeSource` into the normalizer until shutdown.
pub struct ChangeRelay<S> {
    source: S,
    normalizer: CdcNormalizer,
    poll_interval: Duration,
}

/// Handle to stop and join a spawned relay.
#[derive(Debug)]
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RelayHandle {
    /// Request graceful shutdown and wait for the relay to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

impl<S: ChangeSource + 'static> ChangeRelay<S> {
    pub fn new(source: S, normalizer: CdcNormalizer, poll_interval: Duration) -> Self {
        Self {
            source,
            normalizer,
            poll_interval,
        }
    }

    /// Relay one batch.
    ///
    /// Records that cannot be normalized are logged and skipped. A publish
    /// failure aborts the batch without committing it, so the same batch is
    /// returned by the next poll. Empty batches are committed too: the source
    /// may have consumed documents that carry no row change.
    pub async fn run_once(&mut self) -> Result<RelayStats, RelayError> {
        let batch = self.source.poll().await?;
        let mut stats = RelayStats::default();

        for raw in batch {
            let table = raw.table.clone();
            match self.normalizer.normalize(raw) {
                Ok(envelope) => {
                    self.normalizer.publish(&envelope).await?;
                    stats.published += 1;
                }
                Err(e) => {
                    error!(table = %table, error = %e, "skipping change record that cannot be normalized");
                    stats.skipped += 1;
                }
            }
        }

        self.source.commit().await?;
        if stats.published + stats.skipped == 0 {
            return Ok(stats);
        }
        debug!(published = stats.published, skipped = stats.skipped, "change batch relayed");
        Ok(stats)
    }

    /// Poll until `shutdown` flips to `true` or the source closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("change relay started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(stats) => stats.published + stats.skipped == 0,
                Err(RelayError::Source(ChangeSourceError::Closed)) => {
                    info!("change source closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "change relay batch failed, will re-poll");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        info!("change relay stopped");
    }

    pub fn spawn(self) -> RelayHandle {
        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(self.run(rx));
        RelayHandle { shutdown: tx, join }
    }
}
