//! Worker and cron abstractions.
//!
//! A **worker** is bound to one subscription name and handles one decoded
//! message at a time. A **cron job** is bound to one name and runs when
//! its endpoint is triggered by a scheduler.
//!
//! ## Context
//!
//! Both receive a shared context `C` (store, integrations, publisher, ...).
//! The framework only needs one thing from it: the store's write-error
//! classifier, which the acknowledgement policy consults.
//!
//! ## Errors
//!
//! Handlers return `WorkerError`. They must not swallow errors they cannot
//! classify; the dispatcher decides between acknowledge and redeliver.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{ClassifyWriteError, StoreError};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::codec::{self, DecodeError};
use crate::envelope::Delivery;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Deliberate drop: the input can never be processed.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Infrastructure hiccup (network, pool, integration); worth a retry.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkerError {
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }
}

/// Shared handler context, as seen by the framework.
pub trait WorkerContext: Send + Sync + 'static {
    fn write_errors(&self) -> &dyn ClassifyWriteError;
}

#[async_trait]
pub trait Worker<C: WorkerContext>: Send + Sync + 'static {
    /// Declared payload shape. A mismatch is a `DecodeError`.
    type Payload: DeserializeOwned + Send + 'static;

    fn subscription(&self) -> &'static str;

    async fn handle(&self, delivery: Delivery<Self::Payload>, ctx: &C) -> Result<(), WorkerError>;
}

/// Object-safe view of a `Worker`, used by the registry and dispatcher.
#[async_trait]
pub trait ErasedWorker<C>: Send + Sync {
    fn subscription(&self) -> &'static str;

    async fn handle_value(
        &self,
        message_id: &str,
        data: JsonValue,
        ctx: &C,
    ) -> Result<(), WorkerError>;
}

#[async_trait]
impl<C, W> ErasedWorker<C> for W
where
    C: WorkerContext,
    W: Worker<C>,
{
    fn subscription(&self) -> &'static str {
        Worker::subscription(self)
    }

    async fn handle_value(
        &self,
        message_id: &str,
        data: JsonValue,
        ctx: &C,
    ) -> Result<(), WorkerError> {
        let payload: W::Payload = codec::conform(data)?;
        self.handle(Delivery::new(message_id, payload), ctx).await
    }
}

pub type BoxedWorker<C> = Arc<dyn ErasedWorker<C>>;

pub fn boxed_worker<C, W>(worker: W) -> BoxedWorker<C>
where
    C: WorkerContext,
    W: Worker<C>,
{
    Arc::new(worker)
}

#[async_trait]
pub trait CronJob<C: WorkerContext>: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// `input` is the parsed request body, when one was sent.
    async fn run(&self, input: Option<JsonValue>, ctx: &C) -> Result<(), WorkerError>;
}

pub type BoxedCron<C> = Arc<dyn CronJob<C>>;

pub fn boxed_cron<C, J>(job: J) -> BoxedCron<C>
where
    C: WorkerContext,
    J: CronJob<C>,
{
    Arc::new(job)
}
