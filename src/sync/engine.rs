use async_trait::async_trait;
use sqlx::SqlitePool;

use super::error::SyncResult;

/// Result of one pull pass: rows applied locally and the server cursor the
/// replica now stands at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullOutcome {
    pub applied: usize,
    pub cursor: i64,
}

/// Result of one push pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOutcome {
    pub sent: usize,
}

/// Replication contract against the canonical remote copy.
///
/// The connection owns the pool; engines borrow it per call and keep their
/// own durable state inside the store itself so a replica can resume after
/// a restart.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    /// Engine-local bootstrap, safe to call repeatedly. Must not touch the
    /// network: a device that opens its replica offline still gets a fully
    /// working local store.
    async fn connect(&self, pool: &SqlitePool) -> SyncResult<()>;

    /// Brings remote changes into the local store.
    async fn pull(&self, pool: &SqlitePool) -> SyncResult<PullOutcome>;

    /// Ships locally captured changes to the remote.
    async fn push(&self, pool: &SqlitePool) -> SyncResult<PushOutcome>;

    /// Releases engine resources. A no-op for connectionless engines.
    async fn close(&self, pool: &SqlitePool) -> SyncResult<()>;
}
