//! Intent classification and routing into the action or reply branch.
//!
//! Below the confidence threshold the message is a terminal failure with
//! `{"reason": "low_confidence"}`. Actionable intents with extracted actions
//! fan out one `GitJiraExecute` per action; everything else gets a reply.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::payloads::{decode, encode, ClassifyPayload, GitJiraPayload, ReplyPayload};
use crate::clients::ClassificationClient;
use crate::messaging::{TaskEnvelope, TaskKind};
use crate::worker::{HandlerError, HandlerOutcome, TaskHandler};

pub struct ClassifyHandler {
    classifier: Arc<dyn ClassificationClient>,
    confidence_threshold: f64,
}

impl ClassifyHandler {
    pub fn new(classifier: Arc<dyn ClassificationClient>, confidence_threshold: f64) -> Self {
        Self {
            classifier,
            confidence_threshold,
        }
    }
}

#[async_trait]
impl TaskHandler for ClassifyHandler {
    fn task_kind(&self) -> TaskKind {
        TaskKind::Classify
    }

    async fn handle(&self, envelope: &TaskEnvelope) -> Result<HandlerOutcome, HandlerError> {
        let ClassifyPayload { message } = decode(envelope)?;

        let classification = self.classifier.classify(&message.body).await?;
        info!(
            message_id = %message.id,
            intent = %classification.intent,
            confidence = classification.confidence,
            actions = classification.actions.len(),
            "Message classified"
        );

        if !classification.confidence.is_finite() {
            return Err(HandlerError::validation(format!(
                "classifier returned non-finite confidence {}",
                classification.confidence
            )));
        }
        if classification.confidence < self.confidence_threshold {
            return Err(HandlerError::permanent("low_confidence"));
        }

        let result = json!({
            "message_id": message.id,
            "intent": classification.intent,
            "confidence": classification.confidence,
            "actions": classification.actions.len(),
        });
        let mut outcome = HandlerOutcome::completed(result);

        if classification.intent.is_actionable() && !classification.actions.is_empty() {
            for action in classification.actions {
                let payload = GitJiraPayload {
                    message: message.clone(),
                    action,
                };
                outcome = outcome.with_derived(TaskKind::GitJiraExecute, encode(&payload)?);
            }
        } else {
            let payload = ReplyPayload {
                message,
                intent: classification.intent,
            };
            outcome = outcome.with_derived(TaskKind::ReplyGenerate, encode(&payload)?);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{
        ActionRequest, ActionTarget, Classification, ClientError, InboundMessage, Intent, MessageSource,
    };
    use crate::messaging::QueueRouter;

    struct Fixed(Classification);

    #[async_trait]
    impl ClassificationClient for Fixed {
        async fn classify(&self, _text: &str) -> Result<Classification, ClientError> {
            Ok(self.0.clone())
        }
    }

    fn envelope() -> TaskEnvelope {
        let message = InboundMessage {
            id: "m-1".to_string(),
            source: MessageSource::Email,
            sender: "dev@example.com".to_string(),
            subject: Some("please".to_string()),
            body: "create a repo".to_string(),
            channel: None,
            thread_ts: None,
            received_at: chrono::Utc::now(),
        };
        QueueRouter::default().route(
            TaskKind::Classify,
            serde_json::to_value(ClassifyPayload { message }).unwrap(),
            None,
        )
    }

    fn action(target: ActionTarget) -> ActionRequest {
        ActionRequest {
            target,
            title: "do it".to_string(),
            description: String::new(),
            repository: Some("acme/site".to_string()),
            project: None,
        }
    }

    #[tokio::test]
    async fn test_low_confidence_is_terminal() {
        let handler = ClassifyHandler::new(
            Arc::new(Fixed(Classification {
                intent: Intent::Instructions,
                confidence: 0.2,
                actions: vec![action(ActionTarget::Git)],
            })),
            0.5,
        );
        let err = handler.handle(&envelope()).await.unwrap_err();
        match err {
            HandlerError::Permanent { error_info, .. } => {
                assert_eq!(error_info, json!({ "reason": "low_confidence" }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nan_confidence_is_rejected() {
        let handler = ClassifyHandler::new(
            Arc::new(Fixed(Classification {
                intent: Intent::Instructions,
                confidence: f64::NAN,
                actions: vec![action(ActionTarget::Git)],
            })),
            0.5,
        );
        let err = handler.handle(&envelope()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_actions_fan_out() {
        let handler = ClassifyHandler::new(
            Arc::new(Fixed(Classification {
                intent: Intent::Instructions,
                confidence: 0.9,
                actions: vec![action(ActionTarget::Git), action(ActionTarget::Jira)],
            })),
            0.5,
        );
        let outcome = handler.handle(&envelope()).await.unwrap();
        assert_eq!(outcome.derived.len(), 2);
        assert!(outcome
            .derived
            .iter()
            .all(|d| d.task_kind == TaskKind::GitJiraExecute));
    }

    #[tokio::test]
    async fn test_greeting_goes_to_reply() {
        let handler = ClassifyHandler::new(
            Arc::new(Fixed(Classification {
                intent: Intent::Greeting,
                confidence: 0.99,
                actions: vec![],
            })),
            0.5,
        );
        let outcome = handler.handle(&envelope()).await.unwrap();
        assert_eq!(outcome.derived.len(), 1);
        assert_eq!(outcome.derived[0].task_kind, TaskKind::ReplyGenerate);
        assert_eq!(outcome.derived[0].payload["intent"], "greeting");
    }
}
