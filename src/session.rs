//! Tenant session lifecycle: login bootstrap, background heartbeat sync,
//! repository access, and sign-out.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{ActorRepository, CollabRepository, NodeRepository, PointRepository};
use crate::ledger::{CartRepository, EventLedger, InventoryRepository, OrderRepository};
use crate::sync::{ReplicaConnection, SyncEngine, SyncError, SyncMetadata, SyncReport};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotAuthenticated,

    #[error("login failed: {0}")]
    Initialization(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Who is signing in. Mirrors the identity provider's claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantIdentity {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
}

impl TenantIdentity {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            display_name: display_name.into(),
        }
    }
}

/// One signed-in tenant: a replica connection plus the background heartbeat
/// that keeps it converging while the app is open.
pub struct TenantSession {
    identity: TenantIdentity,
    connection: Arc<ReplicaConnection>,
    pool: SqlitePool,
    active: bool,
    running: Arc<AtomicBool>,
    heartbeat: Option<JoinHandle<()>>,
}

impl fmt::Debug for TenantSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantSession")
            .field("identity", &self.identity)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl TenantSession {
    /// Initializes the replica for `identity` and starts the background
    /// tasks. The first sync runs off the login path, so a device without a
    /// network still signs in.
    pub async fn login(
        config: &Config,
        engine: Arc<dyn SyncEngine>,
        identity: TenantIdentity,
    ) -> SessionResult<Self> {
        let connection = Arc::new(
            ReplicaConnection::new(config.store_path(), engine)
                .with_close_timeout(config.sync.close_timeout()),
        );

        connection
            .initialize(&identity.user_id, &identity.email, &identity.display_name)
            .await
            .map_err(|err| SessionError::Initialization(err.to_string()))?;
        let pool = connection.pool().await?;

        let initial = connection.clone();
        tokio::spawn(async move {
            if let Err(err) = initial.sync().await {
                warn!(error = %err, "initial sync failed");
            }
        });

        let running = Arc::new(AtomicBool::new(true));
        let heartbeat = tokio::spawn(heartbeat_loop(
            connection.clone(),
            running.clone(),
            config.sync.heartbeat_interval(),
        ));

        info!(user_id = %identity.user_id, "session started");
        Ok(Self {
            identity,
            connection,
            pool,
            active: true,
            running,
            heartbeat: Some(heartbeat),
        })
    }

    pub fn identity(&self) -> &TenantIdentity {
        &self.identity
    }

    /// Foreground sync through the same single-flight pass the heartbeat
    /// uses.
    pub async fn sync_now(&self) -> SessionResult<SyncReport> {
        self.ensure_active()?;
        Ok(self.connection.sync().await?)
    }

    pub async fn sync_status(&self) -> SessionResult<SyncMetadata> {
        self.ensure_active()?;
        Ok(self.connection.sync_status().await?)
    }

    /// Stops the heartbeat, flushes what it can, and closes the replica.
    /// Safe to call twice.
    pub async fn logout(&mut self) -> SessionResult<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }

        self.connection.close().await?;
        info!(user_id = %self.identity.user_id, "session ended");
        Ok(())
    }

    pub fn pool(&self) -> SessionResult<SqlitePool> {
        self.ensure_active()?;
        Ok(self.pool.clone())
    }

    pub fn actors(&self) -> SessionResult<ActorRepository> {
        Ok(ActorRepository::new(self.pool()?))
    }

    pub fn nodes(&self) -> SessionResult<NodeRepository> {
        Ok(NodeRepository::new(self.pool()?))
    }

    pub fn points(&self) -> SessionResult<PointRepository> {
        Ok(PointRepository::new(self.pool()?))
    }

    pub fn collab(&self) -> SessionResult<CollabRepository> {
        Ok(CollabRepository::new(self.pool()?))
    }

    pub fn ledger(&self) -> SessionResult<EventLedger> {
        Ok(EventLedger::new(self.pool()?))
    }

    pub fn cart(&self) -> SessionResult<CartRepository> {
        Ok(CartRepository::new(self.ledger()?))
    }

    pub fn orders(&self) -> SessionResult<OrderRepository> {
        Ok(OrderRepository::new(self.ledger()?))
    }

    pub fn inventory(&self) -> SessionResult<InventoryRepository> {
        Ok(InventoryRepository::new(self.ledger()?))
    }

    fn ensure_active(&self) -> SessionResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(SessionError::NotAuthenticated)
        }
    }
}

impl Drop for TenantSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

async fn heartbeat_loop(
    connection: Arc<ReplicaConnection>,
    running: Arc<AtomicBool>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
    // The first tick fires immediately; the initial sync already covers it.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match connection.sync().await {
            Ok(report) => debug!(
                applied = report.pull.applied,
                sent = report.push.sent,
                "heartbeat sync"
            ),
            Err(err) => warn!(error = %err, "heartbeat sync failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, ConfigValue, SyncConfig};
    use crate::models::{Node, NodeType, Point};
    use crate::sync::{PullOutcome, PushOutcome, SyncResult};
    use async_trait::async_trait;
    use tempfile::{tempdir, TempDir};

    struct NullEngine;

    #[async_trait]
    impl SyncEngine for NullEngine {
        async fn connect(&self, _pool: &SqlitePool) -> SyncResult<()> {
            Ok(())
        }

        async fn pull(&self, _pool: &SqlitePool) -> SyncResult<PullOutcome> {
            Ok(PullOutcome::default())
        }

        async fn push(&self, _pool: &SqlitePool) -> SyncResult<PushOutcome> {
            Ok(PushOutcome::default())
        }

        async fn close(&self, _pool: &SqlitePool) -> SyncResult<()> {
            Ok(())
        }
    }

    struct UnreachableEngine;

    #[async_trait]
    impl SyncEngine for UnreachableEngine {
        async fn connect(&self, _pool: &SqlitePool) -> SyncResult<()> {
            Err(SyncError::Transport("no route to host".into()))
        }

        async fn pull(&self, _pool: &SqlitePool) -> SyncResult<PullOutcome> {
            Err(SyncError::Transport("no route to host".into()))
        }

        async fn push(&self, _pool: &SqlitePool) -> SyncResult<PushOutcome> {
            Err(SyncError::Transport("no route to host".into()))
        }

        async fn close(&self, _pool: &SqlitePool) -> SyncResult<()> {
            Ok(())
        }
    }

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: ConfigValue::new(temp_dir.path().to_path_buf(), ConfigSource::Default),
            config_file: None,
            sync: SyncConfig::default(),
        }
    }

    fn buyer() -> TenantIdentity {
        TenantIdentity::new("u1", "u1@trinkit.dev", "U One")
    }

    #[tokio::test]
    async fn test_login_upserts_identity_and_serves_repositories() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(&temp_dir);
        let mut session = TenantSession::login(&config, Arc::new(NullEngine), buyer())
            .await
            .unwrap();

        let me = session.actors().unwrap().get_by_id("u1").await.unwrap();
        assert_eq!(me.map(|a| a.name), Some("U One".to_string()));

        let node = session
            .nodes()
            .unwrap()
            .create(&Node::new(NodeType::Product, "Ring"))
            .await
            .unwrap();
        let point = session
            .points()
            .unwrap()
            .create(&Point::new(&node.id, "u1"))
            .await
            .unwrap();
        assert_eq!(point.stock, "0");

        session.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_accessors_fail_after_logout() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(&temp_dir);
        let mut session = TenantSession::login(&config, Arc::new(NullEngine), buyer())
            .await
            .unwrap();

        session.logout().await.unwrap();

        assert!(matches!(
            session.pool(),
            Err(SessionError::NotAuthenticated)
        ));
        assert!(matches!(
            session.cart(),
            Err(SessionError::NotAuthenticated)
        ));
        assert!(matches!(
            session.sync_now().await,
            Err(SessionError::NotAuthenticated)
        ));

        // Second logout is a no-op.
        session.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_now_reports_and_records() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(&temp_dir);
        let mut session = TenantSession::login(&config, Arc::new(NullEngine), buyer())
            .await
            .unwrap();

        let report = session.sync_now().await.unwrap();
        assert_eq!(report.push.sent, 0);

        let status = session.sync_status().await.unwrap();
        assert_eq!(status.last_sync_status.as_deref(), Some("push_ok"));

        session.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_survives_unreachable_sync_service() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(&temp_dir);

        // Engine bootstrap failing is a login failure.
        let err = TenantSession::login(&config, Arc::new(UnreachableEngine), buyer())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Initialization(_)));

        // A connect-capable engine with an unreachable remote still logs in;
        // only the background sync fails.
        let mut session = TenantSession::login(&config, Arc::new(NullEngine), buyer())
            .await
            .unwrap();
        assert!(session.pool().is_ok());
        session.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_logout_stops_heartbeat() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(&temp_dir);
        let mut session = TenantSession::login(&config, Arc::new(NullEngine), buyer())
            .await
            .unwrap();

        assert!(session.heartbeat.is_some());
        session.logout().await.unwrap();
        assert!(session.heartbeat.is_none());
        assert!(!session.running.load(Ordering::SeqCst));
    }
}
