//! # Scheduler Lock
//!
//! Guarantees a single active scheduler. The local lock covers several
//! schedulers inside one process; the PostgreSQL advisory lock covers every
//! process attached to the same database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::errors::SchedulerError;

#[async_trait]
pub trait SchedulerLock: Send + Sync + 'static {
    /// Non-blocking; `Ok(true)` once this instance holds the lock
    async fn try_acquire(&self) -> Result<bool, SchedulerError>;

    /// Re-check a held lock before acting on it; `Ok(false)` once it is lost
    async fn still_held(&self) -> Result<bool, SchedulerError>;

    async fn release(&self) -> Result<(), SchedulerError>;

    fn lock_name(&self) -> &'static str;
}

/// In-process exclusion between schedulers sharing one slot
#[derive(Debug)]
pub struct LocalSchedulerLock {
    slot: Arc<AtomicBool>,
    held: AtomicBool,
}

impl LocalSchedulerLock {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(AtomicBool::new(false)),
            held: AtomicBool::new(false),
        }
    }

    /// Another lock competing for the same slot
    pub fn contender(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            held: AtomicBool::new(false),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl Default for LocalSchedulerLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchedulerLock for LocalSchedulerLock {
    async fn try_acquire(&self) -> Result<bool, SchedulerError> {
        if self.is_held() {
            return Ok(true);
        }
        let acquired = self
            .slot
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if acquired {
            self.held.store(true, Ordering::SeqCst);
        }
        Ok(acquired)
    }

    async fn still_held(&self) -> Result<bool, SchedulerError> {
        Ok(self.is_held())
    }

    async fn release(&self) -> Result<(), SchedulerError> {
        if self.held.swap(false, Ordering::SeqCst) {
            self.slot.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn lock_name(&self) -> &'static str {
        "local"
    }
}

/// Session-level `pg_try_advisory_lock` held on a dedicated connection
///
/// The lock lives as long as the connection, so a crashed holder frees it
/// as soon as PostgreSQL notices the session is gone. The same holds for the
/// holder's own view: once its connection breaks the lock may already belong
/// to another instance, so [`SchedulerLock::still_held`] pings the held connection.
pub struct PgAdvisoryLock {
    pool: PgPool,
    key: i64,
    connection: Mutex<Option<PoolConnection<Postgres>>>,
}

impl std::fmt::Debug for PgAdvisoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgAdvisoryLock").field("key", &self.key).finish()
    }
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool, key: i64) -> Self {
        Self {
            pool,
            key,
            connection: Mutex::new(None),
        }
    }

    pub fn key(&self) -> i64 {
        self.key
    }
}

#[async_trait]
impl SchedulerLock for PgAdvisoryLock {
    async fn try_acquire(&self) -> Result<bool, SchedulerError> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            return Ok(true);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            info!(key = self.key, "Scheduler advisory lock acquired");
            *slot = Some(conn);
        } else {
            debug!(key = self.key, "Scheduler advisory lock held elsewhere");
        }
        Ok(acquired)
    }

    async fn still_held(&self) -> Result<bool, SchedulerError> {
        let mut slot = self.connection.lock().await;
        let Some(conn) = slot.as_mut() else {
            return Ok(false);
        };

        match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&mut **conn).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(key = self.key, error = %e, "Scheduler lock connection lost");
                if let Some(conn) = slot.take() {
                    drop(conn.detach());
                }
                Ok(false)
            }
        }
    }

    async fn release(&self) -> Result<(), SchedulerError> {
        let Some(mut conn) = self.connection.lock().await.take() else {
            return Ok(());
        };
        let _: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await?;
        info!(key = self.key, "Scheduler advisory lock released");
        Ok(())
    }

    fn lock_name(&self) -> &'static str {
        "postgres_advisory"
    }
}
