//! # HTTP Collaborator Client
//!
//! JSON over HTTP for every collaborator port. Status codes map onto
//! [`ClientError`] so handlers see one taxonomy regardless of the service.

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::errors::ClientError;
use super::types::{
    Classification, InboundMessage, IssueMutation, IssueReceipt, ReplyContext, RepositorySync,
    SyncOutcome,
};
use super::{ClassificationClient, MailboxClient, ReplyClient, VcsIssueClient};
use crate::config::ExternalConfig;

const MAILBOX: &str = "mailbox";
const CLASSIFIER: &str = "classifier";
const VCS: &str = "vcs";
const REPLY: &str = "reply";

#[derive(Debug, Clone)]
pub struct HttpCollaboratorClient {
    client: Client,
    mailbox_url: Url,
    classifier_url: Url,
    vcs_url: Url,
    reply_url: Url,
}

#[derive(Debug, Deserialize)]
struct GeneratedReply {
    body: String,
}

impl HttpCollaboratorClient {
    pub fn new(config: &ExternalConfig) -> Result<Self, ClientError> {
        let mut client_builder = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("courier-core/{}", env!("CARGO_PKG_VERSION")));

        if let Some(ref token) = config.api_token {
            let mut default_headers = reqwest::header::HeaderMap::new();
            default_headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {token}").parse().map_err(|e| ClientError::Configuration {
                    message: format!("Invalid API token: {e}"),
                })?,
            );
            client_builder = client_builder.default_headers(default_headers);
        }

        let client = client_builder.build().map_err(|e| ClientError::Configuration {
            message: format!("Failed to create HTTP client: {e}"),
        })?;

        let client = Self {
            client,
            mailbox_url: parse_base(&config.mailbox_url)?,
            classifier_url: parse_base(&config.classifier_url)?,
            vcs_url: parse_base(&config.vcs_url)?,
            reply_url: parse_base(&config.reply_url)?,
        };

        info!(
            mailbox = %client.mailbox_url,
            classifier = %client.classifier_url,
            vcs = %client.vcs_url,
            reply = %client.reply_url,
            auth_enabled = config.api_token.is_some(),
            "Created collaborator client"
        );
        Ok(client)
    }

    async fn send(service: &str, request: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::network(service, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ClientError::from_status(service, status.as_u16(), body))
    }

    async fn send_json<T: DeserializeOwned>(service: &str, request: RequestBuilder) -> Result<T, ClientError> {
        Self::send(service, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ClientError::invalid_response(service, e.to_string()))
    }
}

/// Base URL with a trailing slash so `join` appends instead of replacing
fn parse_base(raw: &str) -> Result<Url, ClientError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|e| ClientError::Configuration {
        message: format!("Invalid collaborator URL '{raw}': {e}"),
    })
}

fn join(service: &str, base: &Url, path: &str) -> Result<Url, ClientError> {
    base.join(path).map_err(|e| ClientError::Configuration {
        message: format!("{service}: failed to construct URL for '{path}': {e}"),
    })
}

#[async_trait]
impl MailboxClient for HttpCollaboratorClient {
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundMessage>, ClientError> {
        let url = join(MAILBOX, &self.mailbox_url, "unread")?;
        debug!(url = %url, limit = limit, "Fetching unread messages");
        Self::send_json(MAILBOX, self.client.get(url).query(&[("limit", limit)])).await
    }

    async fn mark_read(&self, message_id: &str) -> Result<(), ClientError> {
        let url = join(MAILBOX, &self.mailbox_url, &format!("{message_id}/read"))?;
        Self::send(MAILBOX, self.client.post(url)).await.map(|_| ())
    }
}

#[async_trait]
impl ClassificationClient for HttpCollaboratorClient {
    async fn classify(&self, text: &str) -> Result<Classification, ClientError> {
        let request = self
            .client
            .post(self.classifier_url.clone())
            .json(&json!({ "text": text }));
        Self::send_json(CLASSIFIER, request).await
    }
}

#[async_trait]
impl VcsIssueClient for HttpCollaboratorClient {
    async fn sync_repository(
        &self,
        repository: &str,
        destination: &Path,
        instruction: &str,
    ) -> Result<SyncOutcome, ClientError> {
        let url = join(VCS, &self.vcs_url, "repositories/sync")?;
        let body = RepositorySync {
            repository: repository.to_string(),
            destination: destination.to_path_buf(),
            instruction: instruction.to_string(),
        };
        Self::send_json(VCS, self.client.post(url).json(&body)).await
    }

    async fn mutate_issue(&self, mutation: &IssueMutation) -> Result<IssueReceipt, ClientError> {
        let url = join(VCS, &self.vcs_url, "issues")?;
        Self::send_json(VCS, self.client.post(url).json(mutation)).await
    }
}

#[async_trait]
impl ReplyClient for HttpCollaboratorClient {
    async fn generate(&self, context: &ReplyContext) -> Result<String, ClientError> {
        let url = join(REPLY, &self.reply_url, "generate")?;
        let reply: GeneratedReply = Self::send_json(REPLY, self.client.post(url).json(context)).await?;
        Ok(reply.body)
    }

    async fn deliver(&self, message: &InboundMessage, body: &str) -> Result<(), ClientError> {
        let url = join(REPLY, &self.reply_url, "deliver")?;
        let request = self
            .client
            .post(url)
            .json(&json!({ "message": message, "body": body }));
        Self::send(REPLY, request).await.map(|_| ())
    }
}
