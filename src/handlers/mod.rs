//! # Task Handlers
//!
//! One handler per [`crate::messaging::TaskKind`]. Each decodes its kind-specific payload, talks
//! to its collaborator through a port from [`crate::clients`], and returns a
//! result plus the follow-up envelopes that continue the correlation chain.

pub mod classify;
pub mod email_poll;
pub mod file_serve;
pub mod git_jira;
pub mod payloads;
pub mod reply;
pub mod slack_dispatch;

use std::sync::Arc;

pub use classify::ClassifyHandler;
pub use email_poll::EmailPollHandler;
pub use file_serve::FileServeHandler;
pub use git_jira::GitJiraHandler;
pub use reply::{ReplyGenerateHandler, ReplyGitJiraHandler};
pub use slack_dispatch::SlackDispatchHandler;

use crate::clients::{
    ClassificationClient, HttpCollaboratorClient, MailboxClient, ReplyClient, VcsIssueClient,
};
use crate::config::CourierConfig;
use crate::preview::PreviewLayout;
use crate::worker::{HandlerRegistry, RegistryError};

/// Collaborators shared by the standard handler set
#[derive(Clone)]
pub struct HandlerDependencies {
    pub mailbox: Arc<dyn MailboxClient>,
    pub classifier: Arc<dyn ClassificationClient>,
    pub vcs: Arc<dyn VcsIssueClient>,
    pub reply: Arc<dyn ReplyClient>,
    pub preview: PreviewLayout,
    pub confidence_threshold: f64,
    pub mailbox_batch_size: usize,
}

impl std::fmt::Debug for HandlerDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDependencies")
            .field("preview", &self.preview)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("mailbox_batch_size", &self.mailbox_batch_size)
            .finish_non_exhaustive()
    }
}

impl HandlerDependencies {
    /// Every port backed by one HTTP collaborator client
    pub fn from_config(config: &CourierConfig) -> Result<Self, crate::clients::ClientError> {
        let http = Arc::new(HttpCollaboratorClient::new(&config.external)?);
        Ok(Self {
            mailbox: http.clone(),
            classifier: http.clone(),
            vcs: http.clone(),
            reply: http,
            preview: PreviewLayout::from_config(&config.preview),
            confidence_threshold: config.classification.confidence_threshold,
            mailbox_batch_size: config.external.mailbox_batch_size,
        })
    }
}

/// Registry with one handler for every task kind
pub fn default_registry(deps: &HandlerDependencies) -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();
    registry.register(EmailPollHandler::new(
        deps.mailbox.clone(),
        deps.mailbox_batch_size,
    ))?;
    registry.register(SlackDispatchHandler::new())?;
    registry.register(ClassifyHandler::new(
        deps.classifier.clone(),
        deps.confidence_threshold,
    ))?;
    registry.register(GitJiraHandler::new(deps.vcs.clone(), deps.preview.clone()))?;
    registry.register(ReplyGenerateHandler::new(deps.reply.clone()))?;
    registry.register(ReplyGitJiraHandler::new(deps.reply.clone()))?;
    registry.register(FileServeHandler::new(deps.preview.clone()))?;
    Ok(registry)
}
