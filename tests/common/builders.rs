//! Configuration and message builders shared by the integration tests.

use std::path::Path;
use std::sync::Arc;

use courier_core::bootstrap::{Collaborators, DispatchSystem};
use courier_core::callback::IntakeClient;
use courier_core::clients::{
    ActionRequest, ActionTarget, ClassificationClient, InboundMessage, MailboxClient,
    MessageSource, ReplyClient, VcsIssueClient,
};
use courier_core::config::{BackoffConfig, ConfigManager, CourierConfig, PoolSettings};
use courier_core::handlers::HandlerDependencies;
use courier_core::messaging::service::BrokerProvider;
use courier_core::preview::PreviewLayout;
use courier_core::worker::HandlerRegistry;

/// Fast pools, short backoff, no scheduler
pub fn test_config(repos_dir: &Path) -> CourierConfig {
    let mut config = CourierConfig::default();
    config.scheduler.enabled = false;
    config.workers.defaults = PoolSettings {
        concurrency: 2,
        max_attempts: 3,
        handler_timeout_seconds: 5,
        visibility_timeout_seconds: 30,
        poll_interval_ms: 10,
        drain_timeout_seconds: 1,
    };
    config.backoff = BackoffConfig {
        base_delay_ms: 100,
        multiplier: 2.0,
        max_delay_ms: 1_000,
    };
    config.preview.repos_dir = repos_dir.to_path_buf();
    config.preview.base_url = "http://preview.test".to_string();
    config
}

pub fn config_manager(config: CourierConfig) -> Arc<ConfigManager> {
    ConfigManager::from_config(config, "test").expect("test configuration is valid")
}

pub struct CollaboratorSet {
    pub mailbox: Arc<dyn MailboxClient>,
    pub classifier: Arc<dyn ClassificationClient>,
    pub vcs: Arc<dyn VcsIssueClient>,
    pub reply: Arc<dyn ReplyClient>,
}

pub fn collaborators(
    config: &CourierConfig,
    intake: Arc<dyn IntakeClient>,
    set: CollaboratorSet,
) -> Collaborators {
    Collaborators {
        intake,
        handlers: HandlerDependencies {
            mailbox: set.mailbox,
            classifier: set.classifier,
            vcs: set.vcs,
            reply: set.reply,
            preview: PreviewLayout::from_config(&config.preview),
            confidence_threshold: config.classification.confidence_threshold,
            mailbox_batch_size: config.external.mailbox_batch_size,
        },
    }
}

/// Standard handler set over an in-memory broker
pub async fn start_system(config: CourierConfig, collaborators: Collaborators) -> DispatchSystem {
    DispatchSystem::start(
        config_manager(config),
        Arc::new(BrokerProvider::in_memory()),
        collaborators,
    )
    .await
    .expect("system starts")
}

/// Caller-chosen handlers over an in-memory broker
pub async fn start_with_handlers(
    config: CourierConfig,
    intake: Arc<dyn IntakeClient>,
    registry: HandlerRegistry,
) -> DispatchSystem {
    DispatchSystem::start_with_registry(
        config_manager(config),
        Arc::new(BrokerProvider::in_memory()),
        intake,
        registry,
    )
    .await
    .expect("system starts")
}

pub fn email(id: &str, body: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        source: MessageSource::Email,
        sender: "dev@example.com".to_string(),
        subject: Some("request".to_string()),
        body: body.to_string(),
        channel: None,
        thread_ts: None,
        received_at: chrono::Utc::now(),
    }
}

pub fn git_action(repository: &str) -> ActionRequest {
    ActionRequest {
        target: ActionTarget::Git,
        title: "Add a landing page".to_string(),
        description: "Single static page".to_string(),
        repository: Some(repository.to_string()),
        project: None,
    }
}
