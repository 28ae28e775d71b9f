//! Preview publication for synced repositories.

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::git_jira::preview_error;
use super::payloads::{decode, FileServePayload};
use crate::messaging::{TaskEnvelope, TaskKind};
use crate::preview::PreviewLayout;
use crate::worker::{HandlerError, HandlerOutcome, TaskHandler};

pub struct FileServeHandler {
    preview: PreviewLayout,
}

impl FileServeHandler {
    pub fn new(preview: PreviewLayout) -> Self {
        Self { preview }
    }
}

#[async_trait]
impl TaskHandler for FileServeHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::FileServe
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
        let FileServePayload {
            repository,
            task_id,
        } = decode(envelope)?;

        let path = self
            .preview
            .ensure_task_dir(&repository, &task_id)
            .await
            .map_err(preview_error)?;
        let url = self
            .preview
            .preview_url(&repository, &task_id)
            .map_err(preview_error)?;

        info!(repository = %repository, task_id = %task_id, url = %url, "Preview published");
        Ok(HandlerOutcome::completed(json!({
            "repository": repository,
            "task_id": task_id,
            "path": path.display().to_string(),
            "url": url,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::QueueRouter;

    #[tokio::test]
    async fn test_preview_directory_and_url() {
        let root = tempfile::TempDir::new().unwrap();
        let handler = FileServeHandler::new(PreviewLayout::new(root.path(), "http://preview.local"));
        let envelope = QueueRouter::default().route(
            TaskKind::FileServe,
            json!({ "repository": "acme/site", "task_id": "t-9" }),
            None,
        );

        let outcome = handler.handle(&envelope).await.unwrap();

        assert_eq!(outcome.result["url"], "http://preview.local/acme/site/t-9/");
        assert!(root.path().join("acme/site/t-9").is_dir());
    }

    #[tokio::test]
    async fn test_traversal_is_a_validation_failure() {
        let root = tempfile::TempDir::new().unwrap();
        let handler = FileServeHandler::new(PreviewLayout::new(root.path(), "http://p"));
        let envelope = QueueRouter::default().route(
            TaskKind::FileServe,
            json!({ "repository": "..", "task_id": "t" }),
            None,
        );

        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation { .. }));
    }
}
