//! Flagsmith identity-flags client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{FeatureFlags, Flag, IntegrationError};

const SERVICE: &str = "flagsmith";
pub const DEFAULT_BASE_URL: &str = "https://api.flagsmith.com";

#[derive(Debug, Clone)]
pub struct FlagsmithClient {
    http: reqwest::Client,
    base_url: String,
    environment_key: String,
}

impl FlagsmithClient {
    pub fn new(environment_key: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, environment_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, environment_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            environment_key: environment_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentityFlags {
    #[serde(default)]
    flags: Vec<FlagState>,
}

#[derive(Debug, Deserialize)]
struct FlagState {
    feature: Feature,
    enabled: bool,
    #[serde(default)]
    feature_state_value: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    name: String,
}

#[async_trait]
impl FeatureFlags for FlagsmithClient {
    async fn flag(&self, identity: &str, feature: &str) -> Result<Flag, IntegrationError> {
        let url = format!("{}/api/v1/identities/", self.base_url);
        let response = self
            .http
            .get(url)
            .query(&[("identifier", identity)])
            .header("X-Environment-Key", &self.environment_key)
            .send()
            .await
            .map_err(|e| IntegrationError::Request {
                service: SERVICE,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(IntegrationError::Status {
                service: SERVICE,
                status: response.status().as_u16(),
            });
        }

        let body: IdentityFlags = response.json().await.map_err(|e| IntegrationError::Body {
            service: SERVICE,
            message: e.to_string(),
        })?;

        Ok(body
            .flags
            .into_iter()
            .find(|f| f.feature.name == feature)
            .map(|f| Flag {
                enabled: f.enabled,
                value: f.feature_state_value.filter(|v| !v.is_null()),
            })
            .unwrap_or_else(Flag::off))
    }
}
