use async_trait::async_trait;
use tracing::info;

use super::{AnalyticsEvent, AnalyticsSink, Email, IntegrationError, Mailer};

/// Mailer for local runs: logs instead of sending.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), IntegrationError> {
        info!(to = %email.to, template = %email.template, "email (not sent)");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogAnalytics;

#[async_trait]
impl AnalyticsSink for LogAnalytics {
    async fn track(&self, event: AnalyticsEvent) -> Result<(), IntegrationError> {
        info!(user_id = %event.user_id, event = %event.event, "analytics event (not sent)");
        Ok(())
    }
}
