use sqlx::SqlitePool;
use tracing::debug;

use super::error::StoreResult;

/// Bumped whenever the table layout changes. The version is baked into the
/// store filename, so a layout change lands in a fresh file instead of an
/// in-place migration.
pub const SCHEMA_VERSION: u32 = 3;

pub fn store_filename() -> String {
    format!("trinkit_v{}.db", SCHEMA_VERSION)
}

/// The fixed table set. Additive and repeat-safe: every statement is
/// IF NOT EXISTS, so this runs on every initialize.
const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS actors (
        id TEXT PRIMARY KEY,
        parentid TEXT REFERENCES actors(id),
        actortype TEXT NOT NULL,
        globalcode TEXT NOT NULL,
        name TEXT NOT NULL,
        metadata TEXT,
        vector BLOB
    )",
    "CREATE TABLE IF NOT EXISTS collab (
        id TEXT PRIMARY KEY,
        actorid TEXT NOT NULL REFERENCES actors(id),
        targettype TEXT NOT NULL,
        targetid TEXT NOT NULL,
        role TEXT NOT NULL,
        permissions TEXT,
        createdat TEXT NOT NULL,
        expiresat TEXT
    )",
    "CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        parentid TEXT REFERENCES nodes(id),
        nodetype TEXT NOT NULL,
        universalcode TEXT,
        title TEXT NOT NULL,
        payload TEXT,
        embedding BLOB
    )",
    "CREATE TABLE IF NOT EXISTS points (
        id TEXT PRIMARY KEY,
        noderef TEXT NOT NULL REFERENCES nodes(id),
        sellerid TEXT NOT NULL REFERENCES actors(id),
        sku TEXT,
        lat REAL,
        lon REAL,
        stock TEXT NOT NULL DEFAULT '0',
        price REAL,
        notes TEXT,
        version INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS streams (
        id TEXT PRIMARY KEY,
        scope TEXT NOT NULL,
        createdby TEXT NOT NULL,
        createdat TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS streamcollab (
        streamid TEXT NOT NULL REFERENCES streams(id),
        actorid TEXT NOT NULL REFERENCES actors(id),
        role TEXT NOT NULL,
        joinedat TEXT NOT NULL,
        PRIMARY KEY (streamid, actorid)
    )",
    "CREATE TABLE IF NOT EXISTS orevents (
        id TEXT PRIMARY KEY,
        streamid TEXT NOT NULL REFERENCES streams(id),
        opcode INTEGER NOT NULL,
        refid TEXT,
        lat REAL,
        lng REAL,
        delta INTEGER NOT NULL DEFAULT 0,
        payload TEXT,
        scope TEXT,
        status TEXT,
        ts INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sync_metadata (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_sync_at TEXT,
        last_sync_status TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_actors_parent ON actors(parentid)",
    "CREATE INDEX IF NOT EXISTS idx_collab_actor ON collab(actorid)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parentid)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(nodetype)",
    "CREATE INDEX IF NOT EXISTS idx_points_node ON points(noderef)",
    "CREATE INDEX IF NOT EXISTS idx_points_seller ON points(sellerid)",
    "CREATE INDEX IF NOT EXISTS idx_orevents_stream ON orevents(streamid)",
    "CREATE INDEX IF NOT EXISTS idx_orevents_stream_opcode ON orevents(streamid, opcode)",
    "INSERT OR IGNORE INTO sync_metadata (id, last_sync_at, last_sync_status) VALUES (1, NULL, NULL)",
];

pub async fn ensure_schema(pool: &SqlitePool) -> StoreResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!(version = SCHEMA_VERSION, "schema ensured");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Text,
    Integer,
    Real,
    Blob,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn text(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        kind: ColumnKind::Text,
    }
}

const fn integer(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        kind: ColumnKind::Integer,
    }
}

const fn real(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        kind: ColumnKind::Real,
    }
}

const fn blob(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        kind: ColumnKind::Blob,
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TableSpec {
    pub name: &'static str,
    /// Primary key columns in declaration order.
    pub key: &'static [&'static str],
    pub columns: &'static [ColumnSpec],
}

/// Tables that replicate. `sync_metadata` and the engine's own `_replica_*`
/// tables are device-local and stay out of this list.
pub(crate) const SYNCED_TABLES: &[TableSpec] = &[
    TableSpec {
        name: "actors",
        key: &["id"],
        columns: &[
            text("id"),
            text("parentid"),
            text("actortype"),
            text("globalcode"),
            text("name"),
            text("metadata"),
            blob("vector"),
        ],
    },
    TableSpec {
        name: "collab",
        key: &["id"],
        columns: &[
            text("id"),
            text("actorid"),
            text("targettype"),
            text("targetid"),
            text("role"),
            text("permissions"),
            text("createdat"),
            text("expiresat"),
        ],
    },
    TableSpec {
        name: "nodes",
        key: &["id"],
        columns: &[
            text("id"),
            text("parentid"),
            text("nodetype"),
            text("universalcode"),
            text("title"),
            text("payload"),
            blob("embedding"),
        ],
    },
    TableSpec {
        name: "points",
        key: &["id"],
        columns: &[
            text("id"),
            text("noderef"),
            text("sellerid"),
            text("sku"),
            real("lat"),
            real("lon"),
            text("stock"),
            real("price"),
            text("notes"),
            integer("version"),
        ],
    },
    TableSpec {
        name: "streams",
        key: &["id"],
        columns: &[text("id"), text("scope"), text("createdby"), text("createdat")],
    },
    TableSpec {
        name: "streamcollab",
        key: &["streamid", "actorid"],
        columns: &[
            text("streamid"),
            text("actorid"),
            text("role"),
            text("joinedat"),
        ],
    },
    TableSpec {
        name: "orevents",
        key: &["id"],
        columns: &[
            text("id"),
            text("streamid"),
            integer("opcode"),
            text("refid"),
            real("lat"),
            real("lng"),
            integer("delta"),
            text("payload"),
            text("scope"),
            text("status"),
            integer("ts"),
        ],
    },
];

pub(crate) fn table_spec(name: &str) -> Option<&'static TableSpec> {
    SYNCED_TABLES.iter().find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_store;
    use tempfile::tempdir;

    async fn table_names(pool: &SqlitePool) -> Vec<String> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .unwrap();
        rows.into_iter().map(|r| r.0).collect()
    }

    #[tokio::test]
    async fn test_ensure_schema_creates_fixed_table_set() {
        let temp_dir = tempdir().unwrap();
        let pool = open_store(&temp_dir.path().join(store_filename()))
            .await
            .unwrap();

        let names = table_names(&pool).await;
        for expected in [
            "actors",
            "collab",
            "nodes",
            "points",
            "streams",
            "streamcollab",
            "orevents",
            "sync_metadata",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let pool = open_store(&temp_dir.path().join(store_filename()))
            .await
            .unwrap();

        sqlx::query("INSERT INTO actors (id, actortype, globalcode, name) VALUES ('u1', 'user', 'u1@x', 'U One')")
            .execute(&pool)
            .await
            .unwrap();

        let before = table_names(&pool).await;
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let after = table_names(&pool).await;
        assert_eq!(before, after);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM actors")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let temp_dir = tempdir().unwrap();
        let pool = open_store(&temp_dir.path().join(store_filename()))
            .await
            .unwrap();

        let result = sqlx::query(
            "INSERT INTO nodes (id, parentid, nodetype, title) VALUES ('n1', 'missing', 'product', 'Ring')",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sync_metadata_seed_row() {
        let temp_dir = tempdir().unwrap();
        let pool = open_store(&temp_dir.path().join(store_filename()))
            .await
            .unwrap();

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM sync_metadata")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn test_store_filename_encodes_version() {
        assert_eq!(store_filename(), format!("trinkit_v{}.db", SCHEMA_VERSION));
    }

    #[test]
    fn test_synced_tables_catalog_matches_keys() {
        for spec in SYNCED_TABLES {
            for key in spec.key {
                assert!(
                    spec.columns.iter().any(|c| c.name == *key),
                    "{} key column {} missing from catalog",
                    spec.name,
                    key
                );
            }
        }
        assert!(table_spec("orevents").is_some());
        assert!(table_spec("sync_metadata").is_none());
    }
}
