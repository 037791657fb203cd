//! Advisor backed by a JSON-over-HTTP completion endpoint.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{Advisor, AdvisorError, AdvisorRequest};
use crate::config::AdvisorSettings;
use crate::error::{ErrorContext, OptimizerError, OptimizerResult};

pub struct HttpAdvisor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpAdvisor {
    /// Build a client from the advisor settings.
    ///
    /// The bearer token, when configured, is read from the named environment
    /// variable once, here.
    pub fn from_settings(settings: &AdvisorSettings) -> OptimizerResult<Self> {
        if settings.endpoint.trim().is_empty() {
            return Err(OptimizerError::configuration_with_context(
                "advisor endpoint is empty",
                ErrorContext::new("build_advisor").with_entity_id("advisor.endpoint"),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| {
                OptimizerError::configuration_with_context(
                    format!("Failed to build HTTP client: {}", e),
                    ErrorContext::new("build_advisor"),
                )
            })?;
        let api_key = settings
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn advise(&self, request: &AdvisorRequest) -> Result<Value, AdvisorError> {
        let body = json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "request": request,
        });
        let mut call = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        debug!("Consulting advisor at {} for {}", self.endpoint, request.course);
        let response = call
            .send()
            .await
            .map_err(|e| AdvisorError::Unreachable(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AdvisorError::Unreachable(format!("failed to read reply: {}", e)))?;
        if !status.is_success() {
            return Err(AdvisorError::Unreachable(format!(
                "advisor returned {}: {}",
                status,
                text.trim()
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| AdvisorError::InvalidResponse(format!("{} ({})", e, text.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_endpoint_is_rejected() {
        let settings = AdvisorSettings::default();
        let err = HttpAdvisor::from_settings(&settings).err().unwrap();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_unreachable() {
        let settings = AdvisorSettings {
            endpoint: "http://127.0.0.1:9/advise".to_string(),
            timeout_secs: 2,
            ..AdvisorSettings::default()
        };
        let advisor = HttpAdvisor::from_settings(&settings).unwrap();
        let request = AdvisorRequest {
            course: "ALG".into(),
            description: String::new(),
            options: Vec::new(),
            temperature: 0.1,
            max_tokens: 10,
            response_schema: Value::Null,
        };
        let err = advisor.advise(&request).await.unwrap_err();
        assert!(matches!(err, AdvisorError::Unreachable(_)));
    }
}
