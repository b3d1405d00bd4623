use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AnalyticsEvent, AnalyticsSink, Email, FeatureFlags, Flag, IntegrationError, Mailer};

/// Mailer that keeps every email in memory.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
    failing: Mutex<bool>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// While set, every send fails.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut f) = self.failing.lock() {
            *f = failing;
        }
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: Email) -> Result<(), IntegrationError> {
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(IntegrationError::Status {
                service: "mail",
                status: 503,
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingAnalytics {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingAnalytics {
    async fn track(&self, event: AnalyticsEvent) -> Result<(), IntegrationError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

/// Fixed flag table keyed by `(identity, feature)`; anything else is off.
#[derive(Debug, Default)]
pub struct StaticFlags {
    flags: Mutex<HashMap<(String, String), Flag>>,
}

impl StaticFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, identity: &str, feature: &str, flag: Flag) {
        if let Ok(mut flags) = self.flags.lock() {
            flags.insert((identity.to_string(), feature.to_string()), flag);
        }
    }
}

#[async_trait]
impl FeatureFlags for StaticFlags {
    async fn flag(&self, identity: &str, feature: &str) -> Result<Flag, IntegrationError> {
        let flags = self.flags.lock().map_err(|_| IntegrationError::Request {
            service: "flags",
            message: "flag table lock poisoned".to_string(),
        })?;
        Ok(flags
            .get(&(identity.to_string(), feature.to_string()))
            .cloned()
            .unwrap_or_else(Flag::off))
    }
}
