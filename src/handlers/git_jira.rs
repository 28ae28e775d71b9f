//! Version-control and issue-tracker actions.
//!
//! Git actions sync the repository into the preview layout under a task id
//! derived from the envelope's dedup key, so a retried action lands in the
//! same directory. Both branches hand their result to reply generation; git
//! actions also publish the preview.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::payloads::{decode, encode, FileServePayload, GitJiraPayload, ReplyGitJiraPayload};
use crate::clients::{ActionTarget, IssueMutation, VcsIssueClient};
use crate::messaging::{TaskEnvelope, TaskKind};
use crate::preview::{PreviewError, PreviewLayout};
use crate::worker::{HandlerError, HandlerOutcome, TaskHandler};

pub struct GitJiraHandler {
    vcs: Arc<dyn VcsIssueClient>,
    preview: PreviewLayout,
}

impl GitJiraHandler {
    pub fn new(vcs: Arc<dyn VcsIssueClient>, preview: PreviewLayout) -> Self {
        Self { vcs, preview }
    }

    async fn execute_git(
        &self,
        envelope: &TaskEnvelope,
        payload: GitJiraPayload,
    ) -> Result<HandlerOutcome, HandlerError> {
        let repository = payload
            .action
            .repository
            .clone()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| HandlerError::validation("git action has no repository"))?;

        let task_id = envelope.dedup_key().to_string();
        let destination = self
            .preview
            .task_dir(&repository, &task_id)
            .map_err(preview_error)?;

        let instruction = if payload.action.description.is_empty() {
            payload.action.title.clone()
        } else {
            format!("{}\n\n{}", payload.action.title, payload.action.description)
        };
        let sync = self
            .vcs
            .sync_repository(&repository, &destination, &instruction)
            .await?;
        info!(
            repository = %repository,
            task_id = %task_id,
            commit = ?sync.commit,
            "Repository synced"
        );

        let result = json!({
            "target": "git",
            "repository": sync.repository,
            "commit": sync.commit,
            "summary": sync.summary,
            "task_id": task_id,
        });
        let reply = ReplyGitJiraPayload {
            message: payload.message,
            action: payload.action,
            result: result.clone(),
        };
        let serve = FileServePayload {
            repository,
            task_id,
        };
        Ok(HandlerOutcome::completed(result)
            .with_derived(TaskKind::ReplyGitJiraGenerate, encode(&reply)?)
            .with_derived(TaskKind::FileServe, encode(&serve)?))
    }

    async fn execute_jira(&self, payload: GitJiraPayload) -> Result<HandlerOutcome, HandlerError> {
        let mutation = IssueMutation {
            project: payload.action.project.clone(),
            title: payload.action.title.clone(),
            description: payload.action.description.clone(),
        };
        let receipt = self.vcs.mutate_issue(&mutation).await?;
        info!(issue = %receipt.key, "Issue mutated");

        let result = json!({
            "target": "jira",
            "issue": receipt.key,
            "summary": receipt.summary,
        });
        let reply = ReplyGitJiraPayload {
            message: payload.message,
            action: payload.action,
            result: result.clone(),
        };
        Ok(HandlerOutcome::completed(result)
            .with_derived(TaskKind::ReplyGitJiraGenerate, encode(&reply)?))
    }
}

#[async_trait]
impl TaskHandler for GitJiraHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::GitJiraExecute
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
        let payload: GitJiraPayload = decode(envelope)?;
        match payload.action.target {
            ActionTarget::Git => self.execute_git(envelope, payload).await,
            ActionTarget::Jira => self.execute_jira(payload).await,
        }
    }
}

/// Bad path input is the payload's fault; filesystem trouble may clear up
pub(crate) fn preview_error(error: PreviewError) -> HandlerError {
    match error {
        PreviewError::InvalidSegment { .. } => HandlerError::validation(error.to_string()),
        PreviewError::Io { .. } => HandlerError::transient(error.to_string()),
    }
}
