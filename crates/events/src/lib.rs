//! Push-delivery framework: envelopes, change events, workers and dispatch.
//!
//! This crate is transport-agnostic. It turns request bodies into typed
//! payloads, routes them to a registered worker or cron job, and decides
//! whether the delivery is acknowledged or handed back for redelivery.

pub mod change;
pub mod codec;
pub mod dispatch;
pub mod envelope;
pub mod policy;
pub mod registry;
pub mod worker;

pub use change::{
    ChangeEnvelope, ChangeOperation, ChangePayload, ChangeSchema, ChangeShapeError, SourceInfo,
};
pub use codec::DecodeError;
pub use dispatch::{DispatchReport, Dispatcher};
pub use envelope::{Delivery, PushMessage, PushRequest};
pub use policy::{DispatchState, Disposition, FailureKind};
pub use registry::{Registry, RegistryError, Route};
pub use worker::{
    BoxedCron, BoxedWorker, CronJob, ErasedWorker, Worker, WorkerContext, WorkerError, boxed_cron,
    boxed_worker,
};
