//! Outbound integrations used by handlers: mail, analytics, feature flags.
//!
//! Every integration failure is an `IntegrationError`, which handlers report
//! as transient; a redelivery gets another attempt.

mod flagsmith;
mod log;
mod recording;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

pub use flagsmith::FlagsmithClient;
pub use log::{LogAnalytics, LogMailer};
pub use recording::{RecordingAnalytics, RecordingMailer, StaticFlags};

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("{service} request failed: {message}")]
    Request {
        service: &'static str,
        message: String,
    },

    #[error("{service} responded with status {status}")]
    Status { service: &'static str, status: u16 },

    #[error("{service} returned an unexpected body: {message}")]
    Body {
        service: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub to: String,
    pub template: String,
    pub variables: Map<String, JsonValue>,
}

impl Email {
    pub fn new(to: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            template: template.into(),
            variables: Map::new(),
        }
    }

    pub fn var(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub user_id: String,
    pub event: String,
    pub properties: Map<String, JsonValue>,
}

impl AnalyticsEvent {
    pub fn new(user_id: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            event: event.into(),
            properties: Map::new(),
        }
    }
}

/// Feature flag state for one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Flag {
    pub enabled: bool,
    pub value: Option<JsonValue>,
}

impl Flag {
    pub fn off() -> Self {
        Self {
            enabled: false,
            value: None,
        }
    }

    /// Numeric flag value; accepts JSON numbers and numeric strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self.value.as_ref()? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), IntegrationError>;
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn track(&self, event: AnalyticsEvent) -> Result<(), IntegrationError>;
}

#[async_trait]
pub trait FeatureFlags: Send + Sync {
    /// State of `feature` for `identity`; unknown features are off.
    async fn flag(&self, identity: &str, feature: &str) -> Result<Flag, IntegrationError>;
}
