//! HTTP sync engine: row-level replication against the Trinkit sync service.
//!
//! Local writes are captured by SQLite triggers into `_replica_oplog` and
//! pushed upstream as row snapshots. Pulls page changes down from the last
//! server cursor and apply them with capture suspended, so nothing the
//! server sent echoes back on the next push.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::schema::{self, ColumnKind, TableSpec};

use super::engine::{PullOutcome, PushOutcome, SyncEngine};
use super::error::{SyncError, SyncResult};

const DEFAULT_PAGE_SIZE: u32 = 500;

/// Upper bound on pages per pull/push pass. Keeps a single sync call from
/// running unbounded when the backlog is deep; the next pass picks up where
/// this one stopped.
const MAX_SYNC_PAGES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Upsert,
    Delete,
}

/// One replicated row change. `key` is the primary key value, composite
/// keys joined with ':'. Upserts carry the full row as a column map, with
/// blob columns base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowChange {
    pub table: String,
    pub op: ChangeOp,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<Value>,
    #[serde(default)]
    pub seq: i64,
}

#[derive(Debug, Serialize)]
struct PullRequest {
    cursor: i64,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    changes: Vec<RowChange>,
    cursor: i64,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Serialize)]
struct PushRequest {
    client_id: String,
    changes: Vec<RowChange>,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    accepted: usize,
}

/// Sync engine speaking the row-change protocol over HTTPS.
pub struct HttpSyncEngine {
    base_url: String,
    token: String,
    client: reqwest::Client,
    page_size: u32,
}

impl HttpSyncEngine {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client: reqwest::Client::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn endpoint_url(&self, path: &str) -> String {
        let base = if self.base_url.starts_with("http://") || self.base_url.starts_with("https://")
        {
            self.base_url.clone()
        } else {
            format!("https://{}", self.base_url)
        };
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    async fn post_json<Req, Resp>(&self, url: &str, body: &Req) -> SyncResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::ServerError {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SyncError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|err| SyncError::Protocol(err.to_string()))
    }
}

#[async_trait]
impl SyncEngine for HttpSyncEngine {
    async fn connect(&self, pool: &SqlitePool) -> SyncResult<()> {
        for statement in ENGINE_STATEMENTS {
            sqlx::query(statement).execute(pool).await?;
        }
        for spec in schema::SYNCED_TABLES {
            for statement in capture_trigger_statements(spec) {
                sqlx::query(&statement).execute(pool).await?;
            }
        }

        // Device identity is assigned once per store and survives restarts.
        sqlx::query("UPDATE _replica_sync_state SET client_id = ? WHERE id = 1 AND client_id IS NULL")
            .bind(Uuid::new_v4().to_string())
            .execute(pool)
            .await?;

        debug!("change capture installed");
        Ok(())
    }

    async fn pull(&self, pool: &SqlitePool) -> SyncResult<PullOutcome> {
        let url = self.endpoint_url("/v1/sync/pull");
        let (_, mut cursor, _) = read_state(pool).await?;
        let mut applied = 0;

        for _ in 0..MAX_SYNC_PAGES {
            let request = PullRequest {
                cursor,
                limit: self.page_size,
            };
            let response: PullResponse = self.post_json(&url, &request).await?;
            applied += apply_changes(pool, &response.changes, response.cursor).await?;
            cursor = response.cursor;
            if !response.has_more {
                break;
            }
        }

        debug!(applied, cursor, "pull complete");
        Ok(PullOutcome { applied, cursor })
    }

    async fn push(&self, pool: &SqlitePool) -> SyncResult<PushOutcome> {
        let url = self.endpoint_url("/v1/sync/push");
        let (client_id, _, mut after_seq) = read_state(pool).await?;
        let client_id = client_id.ok_or(SyncError::NotInitialized)?;
        let mut sent = 0;

        for _ in 0..MAX_SYNC_PAGES {
            let Some(batch) = collect_push_batch(pool, after_seq, self.page_size).await? else {
                break;
            };

            if !batch.changes.is_empty() {
                let request = PushRequest {
                    client_id: client_id.clone(),
                    changes: batch.changes,
                };
                let response: PushResponse = self.post_json(&url, &request).await?;
                if response.accepted != request.changes.len() {
                    warn!(
                        accepted = response.accepted,
                        offered = request.changes.len(),
                        "server accepted a partial push batch"
                    );
                }
                sent += request.changes.len();
            }

            // The watermark only moves after the server has the batch.
            advance_push_watermark(pool, batch.high_seq).await?;
            after_seq = batch.high_seq;
        }

        debug!(sent, "push complete");
        Ok(PushOutcome { sent })
    }

    async fn close(&self, _pool: &SqlitePool) -> SyncResult<()> {
        // Connectionless: reqwest manages its own sockets.
        Ok(())
    }
}

const ENGINE_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS _replica_sync_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        client_id TEXT,
        pull_cursor INTEGER NOT NULL DEFAULT 0,
        pushed_seq INTEGER NOT NULL DEFAULT 0,
        applying INTEGER NOT NULL DEFAULT 0
    )",
    "INSERT OR IGNORE INTO _replica_sync_state (id) VALUES (1)",
    "CREATE TABLE IF NOT EXISTS _replica_oplog (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        tbl TEXT NOT NULL,
        row_key TEXT NOT NULL,
        op TEXT NOT NULL,
        captured_at INTEGER NOT NULL
    )",
];

fn key_expr(spec: &TableSpec, prefix: &str) -> String {
    spec.key
        .iter()
        .map(|k| format!("{prefix}.{k}"))
        .collect::<Vec<_>>()
        .join(" || ':' || ")
}

/// Builds the three capture triggers for one table. All names come from the
/// static table catalog, never from input. The WHEN guard keeps rows applied
/// during a pull out of the outbound log.
fn capture_trigger_statements(spec: &TableSpec) -> Vec<String> {
    let guard = "(SELECT applying FROM _replica_sync_state WHERE id = 1) = 0";
    let now_ms = "CAST(strftime('%s', 'now') AS INTEGER) * 1000";
    let new_key = key_expr(spec, "NEW");
    let old_key = key_expr(spec, "OLD");

    vec![
        format!(
            "CREATE TRIGGER IF NOT EXISTS _replica_capture_{table}_insert \
             AFTER INSERT ON {table} WHEN {guard} \
             BEGIN \
                 INSERT INTO _replica_oplog (tbl, row_key, op, captured_at) \
                 VALUES ('{table}', {new_key}, 'upsert', {now_ms}); \
             END",
            table = spec.name,
            guard = guard,
            new_key = new_key,
            now_ms = now_ms,
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS _replica_capture_{table}_update \
             AFTER UPDATE ON {table} WHEN {guard} \
             BEGIN \
                 INSERT INTO _replica_oplog (tbl, row_key, op, captured_at) \
                 VALUES ('{table}', {new_key}, 'upsert', {now_ms}); \
             END",
            table = spec.name,
            guard = guard,
            new_key = new_key,
            now_ms = now_ms,
        ),
        format!(
            "CREATE TRIGGER IF NOT EXISTS _replica_capture_{table}_delete \
             AFTER DELETE ON {table} WHEN {guard} \
             BEGIN \
                 INSERT INTO _replica_oplog (tbl, row_key, op, captured_at) \
                 VALUES ('{table}', {old_key}, 'delete', {now_ms}); \
             END",
            table = spec.name,
            guard = guard,
            old_key = old_key,
            now_ms = now_ms,
        ),
    ]
}

async fn read_state(pool: &SqlitePool) -> SyncResult<(Option<String>, i64, i64)> {
    let row: Option<(Option<String>, i64, i64)> = sqlx::query_as(
        "SELECT client_id, pull_cursor, pushed_seq FROM _replica_sync_state WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;
    row.ok_or(SyncError::NotInitialized)
}

/// Applies one page of server changes in a single transaction. Capture is
/// suspended for the duration and foreign key checks settle at commit, so a
/// page may carry children before their parents.
pub(crate) async fn apply_changes(
    pool: &SqlitePool,
    changes: &[RowChange],
    cursor: i64,
) -> SyncResult<usize> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE _replica_sync_state SET applying = 1 WHERE id = 1")
        .execute(&mut *tx)
        .await?;
    sqlx::query("PRAGMA defer_foreign_keys = ON")
        .execute(&mut *tx)
        .await?;

    let mut applied = 0;
    for change in changes {
        let spec = schema::table_spec(&change.table).ok_or_else(|| {
            SyncError::Protocol(format!("server sent unknown table '{}'", change.table))
        })?;

        match change.op {
            ChangeOp::Upsert => {
                let row = change
                    .row
                    .as_ref()
                    .and_then(|value| value.as_object())
                    .ok_or_else(|| {
                        SyncError::Protocol(format!(
                            "upsert for {} '{}' carries no row",
                            change.table, change.key
                        ))
                    })?;

                let columns: Vec<&str> = spec.columns.iter().map(|c| c.name).collect();
                let placeholders = vec!["?"; columns.len()].join(", ");
                let sql = format!(
                    "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                    spec.name,
                    columns.join(", "),
                    placeholders
                );

                let mut query = sqlx::query(&sql);
                for column in spec.columns {
                    let value = row.get(column.name).unwrap_or(&Value::Null);
                    query = match column.kind {
                        ColumnKind::Text => query.bind(json_text(spec.name, column.name, value)?),
                        ColumnKind::Integer => {
                            query.bind(json_integer(spec.name, column.name, value)?)
                        }
                        ColumnKind::Real => query.bind(json_real(spec.name, column.name, value)?),
                        ColumnKind::Blob => query.bind(json_blob(spec.name, column.name, value)?),
                    };
                }
                query.execute(&mut *tx).await?;
            }
            ChangeOp::Delete => {
                let (clause, parts) = key_clause(spec, &change.key)?;
                let sql = format!("DELETE FROM {} WHERE {}", spec.name, clause);
                let mut query = sqlx::query(&sql);
                for part in parts {
                    query = query.bind(part.to_string());
                }
                query.execute(&mut *tx).await?;
            }
        }
        applied += 1;
    }

    sqlx::query("UPDATE _replica_sync_state SET pull_cursor = ?, applying = 0 WHERE id = 1")
        .bind(cursor)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(applied)
}

pub(crate) struct PushBatch {
    pub changes: Vec<RowChange>,
    /// Highest oplog seq scanned, including entries that produced no change.
    pub high_seq: i64,
}

/// Reads the next slice of the capture log and hydrates current row
/// snapshots for it. Returns None when the log is drained.
pub(crate) async fn collect_push_batch(
    pool: &SqlitePool,
    after_seq: i64,
    limit: u32,
) -> SyncResult<Option<PushBatch>> {
    let entries: Vec<(i64, String, String, String)> = sqlx::query_as(
        "SELECT seq, tbl, row_key, op FROM _replica_oplog WHERE seq > ? ORDER BY seq ASC LIMIT ?",
    )
    .bind(after_seq)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    let Some(last) = entries.last() else {
        return Ok(None);
    };
    let high_seq = last.0;

    let mut changes = Vec::with_capacity(entries.len());
    for (seq, table, row_key, op) in entries {
        match op.as_str() {
            "delete" => changes.push(RowChange {
                table,
                op: ChangeOp::Delete,
                key: row_key,
                row: None,
                seq,
            }),
            "upsert" => {
                let spec = schema::table_spec(&table).ok_or_else(|| {
                    SyncError::Protocol(format!("unknown table '{table}' in change log"))
                })?;
                match load_row_json(pool, spec, &row_key).await? {
                    Some(row) => changes.push(RowChange {
                        table,
                        op: ChangeOp::Upsert,
                        key: row_key,
                        row: Some(row),
                        seq,
                    }),
                    // Row vanished since capture; its delete entry follows.
                    None => continue,
                }
            }
            other => {
                return Err(SyncError::Protocol(format!(
                    "unknown change op '{other}' in change log"
                )))
            }
        }
    }

    Ok(Some(PushBatch { changes, high_seq }))
}

async fn advance_push_watermark(pool: &SqlitePool, seq: i64) -> SyncResult<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE _replica_sync_state SET pushed_seq = ? WHERE id = 1")
        .bind(seq)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM _replica_oplog WHERE seq <= ?")
        .bind(seq)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn load_row_json(
    pool: &SqlitePool,
    spec: &TableSpec,
    key: &str,
) -> SyncResult<Option<Value>> {
    let (clause, parts) = key_clause(spec, key)?;
    let columns: Vec<&str> = spec.columns.iter().map(|c| c.name).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        spec.name,
        clause
    );

    let mut query = sqlx::query(&sql);
    for part in parts {
        query = query.bind(part.to_string());
    }
    let Some(row) = query.fetch_optional(pool).await? else {
        return Ok(None);
    };

    let mut map = serde_json::Map::with_capacity(spec.columns.len());
    for column in spec.columns {
        let value = match column.kind {
            ColumnKind::Text => Value::from(row.try_get::<Option<String>, _>(column.name)?),
            ColumnKind::Integer => Value::from(row.try_get::<Option<i64>, _>(column.name)?),
            ColumnKind::Real => Value::from(row.try_get::<Option<f64>, _>(column.name)?),
            ColumnKind::Blob => match row.try_get::<Option<Vec<u8>>, _>(column.name)? {
                Some(bytes) => Value::String(BASE64.encode(bytes)),
                None => Value::Null,
            },
        };
        map.insert(column.name.to_string(), value);
    }
    Ok(Some(Value::Object(map)))
}

fn key_clause<'a>(spec: &TableSpec, key: &'a str) -> SyncResult<(String, Vec<&'a str>)> {
    let parts: Vec<&str> = key.split(':').collect();
    if parts.len() != spec.key.len() {
        return Err(SyncError::Protocol(format!(
            "key '{key}' does not match the {} key shape",
            spec.name
        )));
    }
    let clause = spec
        .key
        .iter()
        .map(|k| format!("{k} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ");
    Ok((clause, parts))
}

fn protocol_value(table: &str, column: &str, value: &Value) -> SyncError {
    SyncError::Protocol(format!("unexpected value for {table}.{column}: {value}"))
}

fn json_text(table: &str, column: &str, value: &Value) -> SyncResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(protocol_value(table, column, other)),
    }
}

fn json_integer(table: &str, column: &str, value: &Value) -> SyncResult<Option<i64>> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_i64()
        .map(Some)
        .ok_or_else(|| protocol_value(table, column, value))
}

fn json_real(table: &str, column: &str, value: &Value) -> SyncResult<Option<f64>> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_f64()
        .map(Some)
        .ok_or_else(|| protocol_value(table, column, value))
}

fn json_blob(table: &str, column: &str, value: &Value) -> SyncResult<Option<Vec<u8>>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => BASE64
            .decode(s)
            .map(Some)
            .map_err(|_| protocol_value(table, column, value)),
        other => Err(protocol_value(table, column, other)),
    }
}
