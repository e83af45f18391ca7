//! Per-tenant replica handle: owns the pool, serializes initialization,
//! and drives pull/push through the configured engine with retries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::db::{open_store, ActorRepository};

use super::engine::{PullOutcome, PushOutcome, SyncEngine};
use super::error::{SyncError, SyncResult};
use super::retry::RetryPolicy;

const OPEN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Callers waiting on a concurrent initialize give up after this many polls
/// rather than spin behind a wedged opener.
const MAX_OPEN_POLLS: usize = 150;

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

enum ConnState {
    Idle,
    Opening,
    Ready(SqlitePool),
}

/// Device-local record of the last sync attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMetadata {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<String>,
}

/// Outcome of one full sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pull: PullOutcome,
    pub push: PushOutcome,
}

pub struct ReplicaConnection {
    store_path: PathBuf,
    engine: Arc<dyn SyncEngine>,
    retry: RetryPolicy,
    close_timeout: Duration,
    state: Mutex<ConnState>,
    sync_gate: Mutex<()>,
}

impl ReplicaConnection {
    pub fn new(store_path: impl Into<PathBuf>, engine: Arc<dyn SyncEngine>) -> Self {
        Self {
            store_path: store_path.into(),
            engine,
            retry: RetryPolicy::default(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            state: Mutex::new(ConnState::Idle),
            sync_gate: Mutex::new(()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Opens the store, bootstraps the engine, and upserts the signing-in
    /// actor. Idempotent: repeat calls refresh the identity row; concurrent
    /// callers wait while exactly one does the opening.
    pub async fn initialize(
        &self,
        user_id: &str,
        email: &str,
        display_name: &str,
    ) -> SyncResult<()> {
        for _ in 0..MAX_OPEN_POLLS {
            {
                let mut state = self.state.lock().await;
                match &mut *state {
                    ConnState::Ready(pool) => {
                        let pool = pool.clone();
                        drop(state);
                        ActorRepository::new(pool)
                            .upsert_identity(user_id, email, display_name)
                            .await?;
                        return Ok(());
                    }
                    ConnState::Opening => {}
                    ConnState::Idle => {
                        *state = ConnState::Opening;
                        drop(state);
                        return self.open(user_id, email, display_name).await;
                    }
                }
            }
            sleep(OPEN_POLL_INTERVAL).await;
        }

        Err(SyncError::Initialization(
            "timed out waiting for a concurrent initialize".into(),
        ))
    }

    async fn open(&self, user_id: &str, email: &str, display_name: &str) -> SyncResult<()> {
        match self.open_inner(user_id, email, display_name).await {
            Ok(pool) => {
                *self.state.lock().await = ConnState::Ready(pool);
                Ok(())
            }
            Err(err) => {
                // Back to square one so the next caller can try again.
                *self.state.lock().await = ConnState::Idle;
                Err(err)
            }
        }
    }

    async fn open_inner(
        &self,
        user_id: &str,
        email: &str,
        display_name: &str,
    ) -> SyncResult<SqlitePool> {
        let pool = open_store(&self.store_path)
            .await
            .map_err(|err| SyncError::Initialization(format!("open store: {err}")))?;
        self.engine
            .connect(&pool)
            .await
            .map_err(|err| SyncError::Initialization(format!("engine bootstrap: {err}")))?;
        ActorRepository::new(pool.clone())
            .upsert_identity(user_id, email, display_name)
            .await
            .map_err(|err| SyncError::Initialization(format!("identity upsert: {err}")))?;

        info!(user_id, path = %self.store_path.display(), "replica initialized");
        Ok(pool)
    }

    pub async fn pool(&self) -> SyncResult<SqlitePool> {
        match &*self.state.lock().await {
            ConnState::Ready(pool) => Ok(pool.clone()),
            _ => Err(SyncError::NotInitialized),
        }
    }

    pub async fn pull(&self) -> SyncResult<PullOutcome> {
        let pool = self.pool().await?;
        let result = self.retry.run("pull", || self.engine.pull(&pool)).await;

        match &result {
            Ok(outcome) => {
                debug!(applied = outcome.applied, "pull finished");
                record_sync_status(&pool, "pull_ok").await;
            }
            Err(err) => {
                warn!(error = %err, "pull failed");
                record_sync_status(&pool, "pull_failed").await;
            }
        }
        result
    }

    pub async fn push(&self) -> SyncResult<PushOutcome> {
        let pool = self.pool().await?;
        let result = self.retry.run("push", || self.engine.push(&pool)).await;

        match &result {
            Ok(outcome) => {
                debug!(sent = outcome.sent, "push finished");
                record_sync_status(&pool, "push_ok").await;
            }
            Err(err) => {
                warn!(error = %err, "push failed");
                record_sync_status(&pool, "push_failed").await;
            }
        }
        result
    }

    /// Pull then push, one pass at a time. A pull failure skips the push; a
    /// completed pull stays applied even when the push then fails.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        let _flight = self.sync_gate.lock().await;
        let pull = self.pull().await?;
        let push = self.push().await?;
        Ok(SyncReport { pull, push })
    }

    /// Flushes unpushed changes (best effort, raced against the close
    /// timeout), then closes the pool and resets the handle.
    pub async fn close(&self) -> SyncResult<()> {
        let pool = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, ConnState::Idle) {
                ConnState::Ready(pool) => pool,
                _ => return Ok(()),
            }
        };

        match tokio::time::timeout(self.close_timeout, self.engine.push(&pool)).await {
            Ok(Ok(outcome)) => debug!(sent = outcome.sent, "final push flushed"),
            Ok(Err(err)) => warn!(error = %err, "final push failed"),
            Err(_) => warn!(
                timeout_ms = self.close_timeout.as_millis() as u64,
                "final push timed out"
            ),
        }
        if let Err(err) = self.engine.close(&pool).await {
            warn!(error = %err, "engine close failed");
        }

        pool.close().await;
        info!("replica closed");
        Ok(())
    }

    pub async fn sync_status(&self) -> SyncResult<SyncMetadata> {
        let pool = self.pool().await?;
        let row: Option<(Option<String>, Option<String>)> =
            sqlx::query_as("SELECT last_sync_at, last_sync_status FROM sync_metadata WHERE id = 1")
                .fetch_optional(&pool)
                .await?;

        let (last_sync_at, last_sync_status) = row.unwrap_or((None, None));
        Ok(SyncMetadata {
            last_sync_at: last_sync_at.and_then(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
            last_sync_status,
        })
    }
}

/// Sync bookkeeping is advisory; a failure to record never fails the sync.
async fn record_sync_status(pool: &SqlitePool, status: &str) {
    let result =
        sqlx::query("UPDATE sync_metadata SET last_sync_at = ?, last_sync_status = ? WHERE id = 1")
            .bind(Utc::now().to_rfc3339())
            .bind(status)
            .execute(pool)
            .await;
    if let Err(err) = result {
        warn!(error = %err, status, "failed to record sync status");
    }
}
