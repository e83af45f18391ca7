mod actor_repo;
mod collab_repo;
mod error;
mod node_repo;
mod point_repo;
pub mod schema;

pub use actor_repo::{ActorRepository, ActorUpdate};
pub use collab_repo::CollabRepository;
pub use error::{StoreError, StoreResult};
pub use node_repo::{NodeRepository, NodeUpdate};
pub use point_repo::{PointRepository, PointUpdate};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open (creating if missing) the per-tenant replica store and apply the
/// schema. Foreign keys are enforced on every pooled connection.
pub async fn open_store(path: &Path) -> StoreResult<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    schema::ensure_schema(&pool).await?;

    Ok(pool)
}

/// Lenient JSON-column read. A blob that fails to parse is logged and comes
/// back as None rather than failing the whole read.
pub(crate) fn parse_json_column(
    table: &str,
    id: &str,
    column: &str,
    raw: Option<String>,
) -> Option<serde_json::Value> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(table, id, column, %err, "dropping malformed json column");
            None
        }
    }
}

/// Write-time referential pre-check. A miss usually means the referenced row
/// has not replicated to this device yet, so the error says which id to wait
/// for. `table` always comes from call sites with fixed names.
pub(crate) async fn ensure_row_exists<'e, E>(executor: E, table: &str, id: &str) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)");
    let (exists,): (i64,) = sqlx::query_as(&sql).bind(id).fetch_one(executor).await?;

    if exists == 0 {
        return Err(StoreError::MissingReference {
            table: table.to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}
