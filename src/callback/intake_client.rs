//! # Intake Client
//!
//! Transport for reports to the coordinating service's intake endpoint.

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, info};

use super::errors::CallbackError;
use super::types::CallbackReport;
use crate::config::CallbackConfig;

/// One delivery attempt of a report
#[async_trait]
pub trait IntakeClient: Send + Sync + 'static {
    async fn submit(&self, report: &CallbackReport) -> Result<(), CallbackError>;
}

/// `POST {intake_url}` with an optional bearer token
#[derive(Debug, Clone)]
pub struct HttpIntakeClient {
    client: Client,
    intake_url: Url,
}

impl HttpIntakeClient {
    pub fn new(config: &CallbackConfig) -> Result<Self, CallbackError> {
        let intake_url = Url::parse(&config.intake_url).map_err(|e| {
            CallbackError::configuration(format!("Invalid intake URL '{}': {e}", config.intake_url))
        })?;

        let mut client_builder = Client::builder()
            .timeout(config.attempt_timeout())
            .user_agent(format!("courier-core/{}", env!("CARGO_PKG_VERSION")));

        if let Some(ref token) = config.auth_token {
            let mut default_headers = reqwest::header::HeaderMap::new();
            default_headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {token}")
                    .parse()
                    .map_err(|e| CallbackError::configuration(format!("Invalid auth token: {e}")))?,
            );
            client_builder = client_builder.default_headers(default_headers);
        }

        let client = client_builder
            .build()
            .map_err(|e| CallbackError::configuration(format!("Failed to create HTTP client: {e}")))?;

        info!(
            intake_url = %intake_url,
            auth_enabled = config.auth_token.is_some(),
            "Created intake client"
        );

        Ok(Self { client, intake_url })
    }
}

#[async_trait]
impl IntakeClient for HttpIntakeClient {
    async fn submit(&self, report: &CallbackReport) -> Result<(), CallbackError> {
        debug!(
            correlation_id = %report.correlation_id,
            task_kind = %report.task_kind,
            status = ?report.status,
            "Submitting callback report"
        );

        let response = self
            .client
            .post(self.intake_url.clone())
            .json(report)
            .send()
            .await
            .map_err(|e| CallbackError::transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        // 409 means the endpoint already holds this idempotency key
        if status == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        // Don't retry client errors (4xx) apart from throttling
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CallbackError::rejected(status.as_u16(), body));
        }
        Err(CallbackError::transport(format!("HTTP {status}: {body}")))
    }
}
