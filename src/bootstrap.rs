//! # Dispatch System Bootstrap
//!
//! Assembles a running system from configuration: broker and queues, the
//! callback gateway, one worker pool per registered task kind and, when
//! enabled, the periodic scheduler.
//!
//! Startup fails fast on infrastructure problems (invalid configuration,
//! unreachable broker). Shutdown stops the scheduler first so no new root
//! events arrive, then drains every pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::callback::{CallbackGateway, GatewaySettings, HttpIntakeClient, IntakeClient};
use crate::config::{ConfigManager, ConfigurationError, CourierConfig, SchedulerLockKind};
use crate::error::Result;
use crate::handlers::{default_registry, HandlerDependencies};
use crate::messaging::service::{Broker, BrokerProvider};
use crate::messaging::{EnvelopePublisher, PublishReceipt, QueueRouter, TaskKind};
use crate::scheduler::{
    LocalSchedulerLock, PeriodicScheduler, PgAdvisoryLock, SchedulerHandle, SchedulerLock,
};
use crate::worker::{
    BackoffPolicy, CompletionLedger, DrainReport, HandlerRegistry, PoolDependencies,
    PoolMetricsSnapshot, StandardErrorClassifier, WorkerCoordinator,
};

/// External collaborators the system is assembled around
#[derive(Clone)]
pub struct Collaborators {
    pub intake: Arc<dyn IntakeClient>,
    pub handlers: HandlerDependencies,
}

impl Collaborators {
    /// HTTP clients for the intake endpoint and every handler port
    pub fn from_config(config: &CourierConfig) -> Result<Self> {
        Ok(Self {
            intake: Arc::new(HttpIntakeClient::new(&config.callback)?),
            handlers: HandlerDependencies::from_config(config)?,
        })
    }
}

/// Point-in-time view of a running system
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub environment: String,
    pub pools: BTreeMap<TaskKind, PoolMetricsSnapshot>,
    pub scheduler_active: bool,
    pub scheduled_events: u64,
}

/// What shutdown drained
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub pools: BTreeMap<TaskKind, DrainReport>,
    pub scheduled_events: u64,
}

/// Handle to a running dispatch system
pub struct DispatchSystem {
    config_manager: Arc<ConfigManager>,
    broker: Arc<BrokerProvider>,
    publisher: EnvelopePublisher,
    gateway: Arc<CallbackGateway>,
    ledger: Arc<CompletionLedger>,
    workers: WorkerCoordinator,
    scheduler: Option<SchedulerHandle>,
}

impl std::fmt::Debug for DispatchSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSystem")
            .field("environment", &self.config_manager.environment())
            .field("pools", &self.workers.pool_count())
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

impl DispatchSystem {
    /// Production assembly: broker and collaborators from configuration
    pub async fn bootstrap(config_manager: Arc<ConfigManager>) -> Result<Self> {
        info!(
            environment = %config_manager.environment(),
            "🚀 BOOTSTRAP: Starting dispatch system"
        );
        let config = config_manager.config();
        let broker = Arc::new(BrokerProvider::from_config(&config.broker).await?);
        let collaborators = Collaborators::from_config(config)?;
        Self::start(config_manager, broker, collaborators).await
    }

    /// Assemble around an existing broker and collaborators
    pub async fn start(
        config_manager: Arc<ConfigManager>,
        broker: Arc<BrokerProvider>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let registry = default_registry(&collaborators.handlers)?;
        Self::start_with_registry(config_manager, broker, collaborators.intake, registry).await
    }

    /// Assemble with a caller-supplied handler set
    pub async fn start_with_registry(
        config_manager: Arc<ConfigManager>,
        broker: Arc<BrokerProvider>,
        intake: Arc<dyn IntakeClient>,
        registry: HandlerRegistry,
    ) -> Result<Self> {
        let config = config_manager.config();

        let router = QueueRouter::from_config(&config.queues);
        broker.ensure_queues(&router.queue_names()).await?;
        info!(
            queues = router.queue_names().len(),
            provider = ?config.broker.provider,
            "✅ BOOTSTRAP: Queues ready"
        );

        let publisher = EnvelopePublisher::new(broker.clone(), router);
        let retention = config.workers.dedup_retention();
        let gateway = Arc::new(CallbackGateway::new(
            intake,
            GatewaySettings {
                retention,
                ..GatewaySettings::from(&config.callback)
            },
        ));
        let backoff = BackoffPolicy::from_config(&config.backoff);
        let ledger = Arc::new(CompletionLedger::with_retention(retention));

        let deps = PoolDependencies {
            publisher: publisher.clone(),
            gateway: gateway.clone(),
            classifier: Arc::new(StandardErrorClassifier::new(backoff)),
            ledger: ledger.clone(),
            backoff,
        };
        let workers = WorkerCoordinator::start(&registry, &config.workers, deps);
        info!(pools = workers.pool_count(), "✅ BOOTSTRAP: Worker pools started");

        let scheduler = if config.scheduler.enabled {
            let lock = Self::scheduler_lock(config, &broker).await?;
            let scheduler = PeriodicScheduler::from_config(&config.scheduler, publisher.clone(), lock)?;
            info!(
                entries = scheduler.entries().len(),
                "✅ BOOTSTRAP: Periodic scheduler started"
            );
            Some(scheduler.spawn())
        } else {
            info!("BOOTSTRAP: Periodic scheduler disabled");
            None
        };

        Ok(Self {
            config_manager,
            broker,
            publisher,
            gateway,
            ledger,
            workers,
            scheduler,
        })
    }

    async fn scheduler_lock(
        config: &CourierConfig,
        broker: &BrokerProvider,
    ) -> Result<Arc<dyn SchedulerLock>> {
        match config.scheduler.lock {
            SchedulerLockKind::Local => Ok(Arc::new(LocalSchedulerLock::new())),
            SchedulerLockKind::Postgres => {
                let pool = match broker.as_postgres() {
                    Some(pg) => pg.pool().clone(),
                    None => Self::connect_lock_pool(config).await?,
                };
                Ok(Arc::new(PgAdvisoryLock::new(pool, config.scheduler.lock_key)))
            }
        }
    }

    async fn connect_lock_pool(config: &CourierConfig) -> Result<PgPool> {
        let url = config.broker.database_url.as_deref().ok_or_else(|| {
            ConfigurationError::missing_required_field(
                "broker.database_url",
                "postgres scheduler lock",
            )
        })?;
        let pool = PgPoolOptions::new().max_connections(2).connect(url).await?;
        Ok(pool)
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn broker(&self) -> &Arc<BrokerProvider> {
        &self.broker
    }

    pub fn publisher(&self) -> &EnvelopePublisher {
        &self.publisher
    }

    pub fn gateway(&self) -> &Arc<CallbackGateway> {
        &self.gateway
    }

    pub fn ledger(&self) -> &Arc<CompletionLedger> {
        &self.ledger
    }

    pub fn workers(&self) -> &WorkerCoordinator {
        &self.workers
    }

    /// Ingestion entry point: start a new correlation chain
    pub async fn submit(
        &self,
        task_kind: TaskKind,
        payload: serde_json::Value,
    ) -> Result<PublishReceipt> {
        if !task_kind.is_ingestion() {
            warn!(task_kind = %task_kind, "Submitting a derived task kind as a root event");
        }
        Ok(self.publisher.publish_root(task_kind, payload).await?)
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            environment: self.config_manager.environment().to_string(),
            pools: self.workers.metrics(),
            scheduler_active: self.scheduler.as_ref().is_some_and(SchedulerHandle::is_active),
            scheduled_events: self
                .scheduler
                .as_ref()
                .map_or(0, SchedulerHandle::fired_count),
        }
    }

    /// Stop producing, then drain every pool
    pub async fn shutdown(self) -> ShutdownReport {
        info!("🛑 Dispatch system shutdown requested");
        let mut scheduled_events = 0;
        if let Some(scheduler) = self.scheduler {
            scheduled_events = scheduler.fired_count();
            scheduler.shutdown().await;
        }

        let pools = self.workers.shutdown().await;
        let aborted: usize = pools.values().map(|r| r.aborted).sum();
        if aborted > 0 {
            warn!(aborted = aborted, "Workers aborted after drain timeout");
        }
        info!(pools = pools.len(), "✅ Dispatch system stopped");

        ShutdownReport {
            pools,
            scheduled_events,
        }
    }
}
