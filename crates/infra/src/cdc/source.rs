use async_trait::async_trait;
use courier_core::StoreError;
use thiserror::Error;
use tokio::sync::mpsc;

use super::RawChangeRecord;

#[derive(Debug, Error)]
pub enum ChangeSourceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("change source is closed")]
    Closed,
}

/// Supplier of raw change records with at-least-once delivery.
///
/// `poll` returns the next batch without consuming it; `commit` consumes
/// the batch last returned. A batch that is polled again before being
/// committed is returned again.
#[async_trait]
pub trait ChangeSource: Send {
    async fn poll(&mut self) -> Result<Vec<RawChangeRecord>, ChangeSourceError>;

    async fn commit(&mut self) -> Result<(), ChangeSourceError>;
}

/// Channel-fed change source, for tests/dev.
#[derive(Debug)]
pub struct ChannelChangeSource {
    rx: mpsc::Receiver<RawChangeRecord>,
    pending: Vec<RawChangeRecord>,
    max_batch: usize,
}

impl ChannelChangeSource {
    pub fn new(max_batch: usize) -> (mpsc::Sender<RawChangeRecord>, Self) {
        let (tx, rx) = mpsc::channel(max_batch.max(1) * 4);
        (
            tx,
            Self {
                rx,
                pending: Vec::new(),
                max_batch: max_batch.max(1),
            },
        )
    }
}

#[async_trait]
impl ChangeSource for ChannelChangeSource {
    async fn poll(&mut self) -> Result<Vec<RawChangeRecord>, ChangeSourceError> {
        if !self.pending.is_empty() {
            return Ok(self.pending.clone());
        }

        while self.pending.len() < self.max_batch {
            match self.rx.try_recv() {
                Ok(record) => self.pending.push(record),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) if self.pending.is_empty() => {
                    return Err(ChangeSourceError::Closed);
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }
        Ok(self.pending.clone())
    }

    async fn commit(&mut self) -> Result<(), ChangeSourceError> {
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn uncommitted_batches_are_polled_again() {
        let (tx, mut source) = ChannelChangeSource::new(2);
        for i in 0..3 {
            tx.send(RawChangeRecord::insert("post", json!({ "id": i })))
                .await
                .unwrap();
        }

        let first = source.poll().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(source.poll().await.unwrap(), first);

        source.commit().await.unwrap();
        let second = source.poll().await.unwrap();
        assert_eq!(second.len(), 1);
        source.commit().await.unwrap();

        assert!(source.poll().await.unwrap().is_empty());
        drop(tx);
        assert!(matches!(source.poll().await, Err(ChangeSourceError::Closed)));
    }
}
