use std::sync::Arc;

use courier_core::ClassifyWriteError;
use courier_events::{WorkerContext, WorkerError};
use courier_infra::integrations::{AnalyticsSink, FeatureFlags, IntegrationError, Mailer};
use courier_infra::publish::{MessagePublisher, PublishError};
use courier_infra::store::DataStore;

/// Collaborators every handler runs against.
#[derive(Clone)]
pub struct WorkerCtx {
    pub store: Arc<dyn DataStore>,
    pub mailer: Arc<dyn Mailer>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub flags: Arc<dyn FeatureFlags>,
    pub publisher: Arc<dyn MessagePublisher>,
}

impl WorkerContext for WorkerCtx {
    fn write_errors(&self) -> &dyn ClassifyWriteError {
        self.store.as_ref()
    }
}

/// Integrations are remote calls; a failure is worth another attempt.
pub(crate) fn integration_failed(err: IntegrationError) -> WorkerError {
    WorkerError::transient(err.to_string())
}

pub(crate) fn publish_failed(err: PublishError) -> WorkerError {
    WorkerError::transient(err.to_string())
}
