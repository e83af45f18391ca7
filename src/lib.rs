//! Trinkit Core Library
//!
//! Per-tenant replica store, entity repositories, and the order/inventory
//! event ledger for Trinkit applications.

pub mod config;
pub mod db;
pub mod ledger;
pub mod models;
pub mod session;
pub mod sync;

pub use config::{Config, ConfigError, ConfigSource, ConfigValue, SyncConfig};
pub use db::{
    open_store, ActorRepository, ActorUpdate, CollabRepository, NodeRepository, NodeUpdate,
    PointRepository, PointUpdate, StoreError, StoreResult,
};
pub use ledger::{
    cart_stream_id, latest_by_timestamp, stock_stream_id, AggregateRow, CartLine, CartRepository,
    EventLedger, InventoryRepository, NewOrder, OrderLine, OrderRepository,
};
pub use models::{
    Actor, ActorType, Collab, NewEvent, Node, NodeType, Opcode, OrEvent, Point, Stream,
    StreamCollab, StreamRole,
};
pub use session::{SessionError, SessionResult, TenantIdentity, TenantSession};
pub use sync::{
    HttpSyncEngine, PullOutcome, PushOutcome, ReplicaConnection, RetryPolicy, SyncEngine,
    SyncError, SyncMetadata, SyncReport, SyncResult,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
