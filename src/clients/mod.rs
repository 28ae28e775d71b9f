//! # External Collaborators
//!
//! Ports for the services handlers talk to. Handlers depend only on these
//! traits; [`http::HttpCollaboratorClient`] is the JSON-over-HTTP
//! implementation used in deployments, tests substitute their own.

pub mod errors;
pub mod http;
pub mod types;

use std::path::Path;

use async_trait::async_trait;

pub use errors::ClientError;
pub use http::HttpCollaboratorClient;
pub use types::{
    ActionRequest, ActionTarget, Classification, InboundMessage, Intent, IssueMutation,
    IssueReceipt, MessageSource, ReplyContext, RepositorySync, SyncOutcome,
};

#[async_trait]
pub trait MailboxClient: Send + Sync + 'static {
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundMessage>, ClientError>;

    async fn mark_read(&self, message_id: &str) -> Result<(), ClientError>;
}

#[async_trait]
pub trait ClassificationClient: Send + Sync + 'static {
    async fn classify(&self, text: &str) -> Result<Classification, ClientError>;
}

#[async_trait]
pub trait VcsIssueClient: Send + Sync + 'static {
    /// Clone or update `repository` into `destination` and apply `instruction`
    async fn sync_repository(
        &self,
        repository: &str,
        destination: &Path,
        instruction: &str,
    ) -> Result<SyncOutcome, ClientError>;

    async fn mutate_issue(&self, mutation: &IssueMutation) -> Result<IssueReceipt, ClientError>;
}

#[async_trait]
pub trait ReplyClient: Send + Sync + 'static {
    async fn generate(&self, context: &ReplyContext) -> Result<String, ClientError>;

    /// Send on the message's origin channel (email reply or chat thread)
    async fn deliver(&self, message: &InboundMessage, body: &str) -> Result<(), ClientError>;
}
