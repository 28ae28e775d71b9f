//! # Periodic Scheduler
//!
//! One cooperative timer loop that publishes a fresh root envelope for each
//! schedule entry at each of its boundaries. Missed boundaries are skipped,
//! never replayed.
//!
//! ```text
//! standby ──try_acquire (every lock_retry)──▶ active
//!                                              │ start clock
//!                                              ▼
//!                     sleep until earliest boundary ─▶ publish due entries
//!                              ▲                              │
//!                              └──────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::entry::{ScheduleEntry, ScheduleSpec};
use super::errors::SchedulerError;
use super::lock::SchedulerLock;
use crate::config::SchedulerConfig;
use crate::constants::events;
use crate::messaging::service::wait_for_shutdown;
use crate::messaging::EnvelopePublisher;

pub struct PeriodicScheduler {
    entries: Vec<ScheduleEntry>,
    publisher: EnvelopePublisher,
    lock: Arc<dyn SchedulerLock>,
    lock_retry: Duration,
}

#[derive(Debug, Default)]
struct SchedulerStatus {
    active: AtomicBool,
    fired: AtomicU64,
    publish_failures: AtomicU64,
}

enum ActiveExit {
    Shutdown,
    LockLost,
    /// No entry has another boundary
    Exhausted,
}

pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    status: Arc<SchedulerStatus>,
}

impl PeriodicScheduler {
    pub fn new(
        entries: Vec<ScheduleEntry>,
        publisher: EnvelopePublisher,
        lock: Arc<dyn SchedulerLock>,
        lock_retry: Duration,
    ) -> Self {
        Self {
            entries,
            publisher,
            lock,
            lock_retry,
        }
    }

    pub fn from_config(
        config: &SchedulerConfig,
        publisher: EnvelopePublisher,
        lock: Arc<dyn SchedulerLock>,
    ) -> Result<Self, SchedulerError> {
        let entries = config
            .entries
            .iter()
            .map(ScheduleEntry::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(entries, publisher, lock, config.lock_retry()))
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status = Arc::new(SchedulerStatus::default());
        let task = tokio::spawn(self.run(shutdown_rx, Arc::clone(&status)));
        SchedulerHandle {
            shutdown_tx,
            task,
            status,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>, status: Arc<SchedulerStatus>) {
        if self.entries.is_empty() {
            info!("No schedule entries configured; scheduler idle");
            return;
        }

        while self.acquire_lock(&mut shutdown).await {
            status.active.store(true, Ordering::SeqCst);
            let exit = self.run_active(&mut shutdown, &status).await;
            status.active.store(false, Ordering::SeqCst);

            match exit {
                ActiveExit::LockLost => {
                    warn!(lock = self.lock.lock_name(), "Scheduler lock lost; back to standby");
                }
                ActiveExit::Shutdown | ActiveExit::Exhausted => break,
            }
        }

        if let Err(e) = self.lock.release().await {
            warn!(error = %e, "Failed to release scheduler lock");
        }
        info!("Periodic scheduler stopped");
    }

    /// Timer loop while holding the lock; the clock starts on entry
    async fn run_active(&self, shutdown: &mut watch::Receiver<bool>, status: &SchedulerStatus) -> ActiveExit {
        let start = Instant::now();
        let mut next_due: Vec<Option<Instant>> = self
            .entries
            .iter()
            .map(|entry| first_boundary(&entry.spec, start))
            .collect();

        info!(
            entries = self.entries.len(),
            lock = self.lock.lock_name(),
            "Periodic scheduler active"
        );

        loop {
            let Some(earliest) = next_due.iter().flatten().min().copied() else {
                warn!("No schedule entry has a future boundary; scheduler stopping");
                return ActiveExit::Exhausted;
            };

            tokio::select! {
                _ = tokio::time::sleep_until(earliest) => {}
                _ = wait_for_shutdown(shutdown) => return ActiveExit::Shutdown,
            }

            match self.lock.still_held().await {
                Ok(true) => {}
                Ok(false) => return ActiveExit::LockLost,
                Err(e) => {
                    warn!(error = %e, "Scheduler lock check failed");
                    if let Err(e) = self.lock.release().await {
                        debug!(error = %e, "Release after failed lock check");
                    }
                    return ActiveExit::LockLost;
                }
            }

            let now = Instant::now();
            for (entry, due) in self.entries.iter().zip(next_due.iter_mut()) {
                let Some(boundary) = *due else { continue };
                if boundary > now {
                    continue;
                }
                self.fire(entry, status).await;
                *due = next_boundary(&entry.spec, boundary, Instant::now());
            }
        }
    }

    /// Wait in standby until the lock is held; `false` on shutdown
    async fn acquire_lock(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }
            match self.lock.try_acquire().await {
                Ok(true) => return true,
                Ok(false) => debug!(
                    lock = self.lock.lock_name(),
                    retry_secs = self.lock_retry.as_secs(),
                    "Another scheduler is active; standing by"
                ),
                Err(e) => warn!(error = %e, "Scheduler lock acquisition failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.lock_retry) => {}
                _ = wait_for_shutdown(shutdown) => return false,
            }
        }
    }

    async fn fire(&self, entry: &ScheduleEntry, status: &SchedulerStatus) {
        match self
            .publisher
            .publish_root(entry.task_kind, entry.payload.clone())
            .await
        {
            Ok(receipt) => {
                status.fired.fetch_add(1, Ordering::Relaxed);
                info!(
                    event = events::SCHEDULE_FIRED,
                    schedule = %entry.name,
                    task_kind = %entry.task_kind,
                    correlation_id = %receipt.correlation_id,
                    "Schedule fired"
                );
            }
            Err(e) => {
                status.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    schedule = %entry.name,
                    error = %e,
                    "Scheduled publish failed; waiting for the next boundary"
                );
            }
        }
    }
}

fn first_boundary(spec: &ScheduleSpec, start: Instant) -> Option<Instant> {
    match spec {
        ScheduleSpec::Every(interval) => Some(start + *interval),
        ScheduleSpec::Cron { .. } => next_cron_instant(spec),
    }
}

/// Boundary after `fired`, skipping any that already passed by `now`
fn next_boundary(spec: &ScheduleSpec, fired: Instant, now: Instant) -> Option<Instant> {
    match spec {
        ScheduleSpec::Every(interval) => {
            let lag = now.saturating_duration_since(fired).as_nanos();
            let skipped = lag / interval.as_nanos().max(1);
            let steps = u32::try_from(skipped.saturating_add(1)).unwrap_or(u32::MAX);
            let offset = interval.checked_mul(steps).unwrap_or(Duration::MAX);
            fired.checked_add(offset).or_else(|| now.checked_add(*interval))
        }
        ScheduleSpec::Cron { .. } => next_cron_instant(spec),
    }
}

/// Map the next wall-clock cron instant onto the tokio clock
fn next_cron_instant(spec: &ScheduleSpec) -> Option<Instant> {
    let now = Utc::now();
    let next = spec.next_cron_after(now)?;
    let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
    Some(Instant::now() + delay)
}

impl SchedulerHandle {
    /// Whether this instance holds the lock and runs its clock
    pub fn is_active(&self) -> bool {
        self.status.active.load(Ordering::SeqCst)
    }

    pub fn fired_count(&self) -> u64 {
        self.status.fired.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.status.publish_failures.load(Ordering::Relaxed)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::service::{Broker, BrokerProvider};
    use crate::messaging::{QueueRouter, TaskKind};
    use crate::scheduler::lock::LocalSchedulerLock;
    use serde_json::json;

    #[test]
    fn test_missed_boundaries_are_skipped() {
        let start = Instant::now();
        let spec = ScheduleSpec::Every(Duration::from_secs(10));
        let fired = start + Duration::from_secs(10);

        // On time: next boundary is one interval later
        assert_eq!(
            next_boundary(&spec, fired, fired),
            Some(start + Duration::from_secs(20))
        );
        // 25s late: boundaries at 20 and 30 are dropped, next is 40
        assert_eq!(
            next_boundary(&spec, fired, fired + Duration::from_secs(25)),
            Some(start + Duration::from_secs(40))
        );
    }

    #[test]
    fn test_tiny_interval_after_long_stall_does_not_overflow() {
        let fired = Instant::now();
        let spec = ScheduleSpec::Every(Duration::from_nanos(1));
        let now = fired + Duration::from_secs(3 * 86_400);

        let next = next_boundary(&spec, fired, now).unwrap();
        assert!(next > fired);
    }

    /// Local lock whose "session" can be killed, freeing the slot without
    /// the holder releasing it
    struct SessionLock {
        inner: LocalSchedulerLock,
    }

    impl SessionLock {
        async fn kill_session(&self) {
            self.inner.release().await.unwrap();
        }
    }

    #[async_trait::async_trait]
    impl SchedulerLock for SessionLock {
        async fn try_acquire(&self) -> Result<bool, SchedulerError> {
            self.inner.try_acquire().await
        }

        async fn still_held(&self) -> Result<bool, SchedulerError> {
            self.inner.still_held().await
        }

        async fn release(&self) -> Result<(), SchedulerError> {
            self.inner.release().await
        }

        fn lock_name(&self) -> &'static str {
            "session"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lock_stops_firing_before_standby_takes_over() {
        let router = QueueRouter::default();
        let broker = Arc::new(BrokerProvider::in_memory());
        broker.ensure_queues(&router.queue_names()).await.unwrap();
        let publisher = EnvelopePublisher::new(Arc::clone(&broker), router.clone());
        let entry = || {
            ScheduleEntry::new(
                "poll-email",
                ScheduleSpec::Every(Duration::from_secs(60)),
                TaskKind::EmailPoll,
                json!({}),
            )
        };

        let local = LocalSchedulerLock::new();
        let standby_lock = Arc::new(SessionLock {
            inner: local.contender(),
        });
        let active_lock = Arc::new(SessionLock { inner: local });
        let retry = Duration::from_secs(5);

        let first = PeriodicScheduler::new(vec![entry()], publisher.clone(), active_lock.clone(), retry)
            .spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = PeriodicScheduler::new(vec![entry()], publisher, standby_lock, retry).spawn();

        tokio::time::sleep(Duration::from_secs(32)).await;
        active_lock.kill_session().await;

        // The old holder's boundary at 60s passes without a publish
        tokio::time::sleep(Duration::from_secs(30)).await;
        let queue = router.queue_for(TaskKind::EmailPoll);
        let memory = broker.as_in_memory().unwrap();
        assert_eq!(memory.queue_length(queue), 0);
        assert!(!first.is_active());
        assert!(second.is_active());

        // The new holder fires on its own clock
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(memory.queue_length(queue), 1);
        assert_eq!(first.fired_count(), 0);
        assert_eq!(second.fired_count(), 1);

        first.shutdown().await;
        second.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_entry_fires_on_boundaries() {
        let router = QueueRouter::default();
        let broker = Arc::new(BrokerProvider::in_memory());
        broker.ensure_queues(&router.queue_names()).await.unwrap();
        let publisher = EnvelopePublisher::new(Arc::clone(&broker), router.clone());

        let entry = ScheduleEntry::new(
            "poll-email",
            ScheduleSpec::Every(Duration::from_secs(30)),
            TaskKind::EmailPoll,
            json!({}),
        );
        let handle = PeriodicScheduler::new(
            vec![entry],
            publisher,
            Arc::new(LocalSchedulerLock::new()),
            Duration::from_secs(5),
        )
        .spawn();

        let queue = router.queue_for(TaskKind::EmailPoll);
        let memory = broker.as_in_memory().unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(memory.queue_length(queue), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(memory.queue_length(queue), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(memory.queue_length(queue), 2);
        assert_eq!(handle.fired_count(), 2);

        let envelopes = memory.peek_all(queue);
        assert_ne!(envelopes[0].correlation_id(), envelopes[1].correlation_id());
        assert!(envelopes.iter().all(|e| e.is_root()));

        handle.shutdown().await;
    }
}
