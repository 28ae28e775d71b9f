//! # Worker Coordinator
//!
//! Spawns one [`WorkerPool`] per registered handler and drains them all on
//! shutdown. Pools share nothing but the broker, the callback gateway and the
//! completion ledger, so one stalled pool never holds up another.

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::info;

use super::handler::HandlerRegistry;
use super::pool::{DrainReport, PoolDependencies, PoolHandle, PoolMetricsSnapshot, WorkerPool};
use crate::config::WorkersConfig;
use crate::messaging::{QueueName, TaskKind};

pub struct WorkerCoordinator {
    pools: Vec<PoolHandle>,
}

impl WorkerCoordinator {
    /// Start a pool for every handler in the registry
    pub fn start(registry: &HandlerRegistry, workers: &WorkersConfig, deps: PoolDependencies) -> Self {
        let pools: Vec<PoolHandle> = registry
            .task_kinds()
            .into_iter()
            .filter_map(|kind| registry.get(kind).map(|handler| (kind, handler)))
            .map(|(kind, handler)| {
                WorkerPool::new(handler, workers.settings_for(kind), deps.clone()).spawn()
            })
            .collect();

        info!(
            pools = pools.len(),
            workers = pools.iter().map(PoolHandle::worker_count).sum::<usize>(),
            "Worker coordinator started"
        );

        Self { pools }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn queues(&self) -> Vec<(TaskKind, QueueName)> {
        self.pools
            .iter()
            .map(|pool| (pool.task_kind(), pool.queue().clone()))
            .collect()
    }

    pub fn metrics(&self) -> BTreeMap<TaskKind, PoolMetricsSnapshot> {
        self.pools
            .iter()
            .map(|pool| (pool.task_kind(), pool.metrics()))
            .collect()
    }

    pub fn pool_metrics(&self, kind: TaskKind) -> Option<PoolMetricsSnapshot> {
        self.pools
            .iter()
            .find(|pool| pool.task_kind() == kind)
            .map(PoolHandle::metrics)
    }

    /// Stop intake on every pool without waiting
    pub fn request_shutdown(&self) {
        for pool in &self.pools {
            pool.request_shutdown();
        }
    }

    /// Drain every pool concurrently, each with its own drain timeout
    pub async fn shutdown(self) -> BTreeMap<TaskKind, DrainReport> {
        self.request_shutdown();
        let reports = join_all(self.pools.into_iter().map(|pool| async move {
            let kind = pool.task_kind();
            (kind, pool.shutdown().await)
        }))
        .await;

        let aborted: usize = reports.iter().map(|(_, r)| r.aborted).sum();
        info!(pools = reports.len(), aborted = aborted, "Worker coordinator stopped");
        reports.into_iter().collect()
    }
}
