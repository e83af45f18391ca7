//! Replica synchronization for offline-first tenant stores.
//!
//! Local writes land in SQLite immediately; this module moves them to and
//! from the canonical remote copy. The pieces:
//!
//! - `SyncEngine`: the replication contract (connect / pull / push / close)
//! - `HttpSyncEngine`: the default engine, row-change JSON over HTTPS with
//!   trigger-based change capture
//! - `RetryPolicy`: bounded exponential backoff around transient failures
//! - `ReplicaConnection`: the per-tenant handle owning the pool and
//!   serializing initialization and sync passes

pub mod connection;
pub mod engine;
pub mod error;
pub mod http_engine;
pub mod retry;

pub use connection::{ReplicaConnection, SyncMetadata, SyncReport};
pub use engine::{PullOutcome, PushOutcome, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use http_engine::{ChangeOp, HttpSyncEngine, RowChange};
pub use retry::RetryPolicy;
