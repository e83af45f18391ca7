mod cart;
mod inventory;
mod orders;

pub use cart::{cart_stream_id, CartLine, CartRepository};
pub use inventory::{stock_stream_id, InventoryRepository};
pub use orders::{NewOrder, OrderLine, OrderRepository};

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::db::{ensure_row_exists, StoreError, StoreResult};
use crate::models::{NewEvent, Opcode, OrEvent, Stream, StreamCollab, StreamRole};

/// Append-only event log over `streams` and `orevents`. State is never
/// updated in place: readers derive it through the projection queries.
#[derive(Clone)]
pub struct EventLedger {
    pool: SqlitePool,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    streamid: String,
    opcode: i64,
    refid: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    delta: i64,
    payload: Option<String>,
    scope: Option<String>,
    status: Option<String>,
    ts: i64,
}

#[derive(sqlx::FromRow)]
struct StreamRow {
    id: String,
    scope: String,
    createdby: String,
    createdat: String,
}

#[derive(sqlx::FromRow)]
struct StreamCollabRow {
    streamid: String,
    actorid: String,
    role: String,
    joinedat: String,
}

/// One group from `EventLedger::aggregate`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub key: String,
    pub events: u64,
    pub total_delta: i64,
}

impl EventLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert-if-absent. Calling this repeatedly for the same id is the
    /// expected pattern for deterministic streams like carts.
    pub async fn ensure_stream(
        &self,
        id: &str,
        scope: &str,
        created_by: &str,
    ) -> StoreResult<Stream> {
        insert_stream_if_absent(&self.pool, id, scope, created_by).await?;
        self.get_stream(id)
            .await?
            .ok_or_else(|| StoreError::RowNotFound {
                table: "streams".to_string(),
                id: id.to_string(),
            })
    }

    pub async fn get_stream(&self, id: &str) -> StoreResult<Option<Stream>> {
        let row: Option<StreamRow> = sqlx::query_as("SELECT * FROM streams WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(hydrate_stream))
    }

    /// Always an insert. The opcode space is open at write time; readers
    /// decide what unknown codes mean.
    pub async fn append_event(&self, event: &NewEvent) -> StoreResult<OrEvent> {
        ensure_row_exists(&self.pool, "streams", &event.stream_id).await?;
        insert_event(&self.pool, event).await
    }

    pub async fn events_for_stream(&self, stream_id: &str) -> StoreResult<Vec<OrEvent>> {
        let rows: Vec<EventRow> =
            sqlx::query_as("SELECT * FROM orevents WHERE streamid = ? ORDER BY ts, id")
                .bind(stream_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(hydrate_event).collect())
    }

    pub async fn event_count(&self, stream_id: &str) -> StoreResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM orevents WHERE streamid = ?")
                .bind(stream_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Current status of a stream: the status-range event with the greatest
    /// timestamp wins, regardless of insertion order.
    pub async fn project_status(&self, stream_id: &str) -> StoreResult<Option<Opcode>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM orevents WHERE streamid = ? AND opcode IN (501, 502, 503, 504, 505)",
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await?;

        let events: Vec<OrEvent> = rows.into_iter().map(hydrate_event).collect();
        Ok(latest_by_timestamp(&events).map(|event| event.opcode))
    }

    /// SUM(delta) over a stream's events, optionally narrowed to one opcode.
    pub async fn project_quantity(
        &self,
        stream_id: &str,
        opcode: Option<Opcode>,
    ) -> StoreResult<i64> {
        let sum: (Option<i64>,) = match opcode {
            Some(opcode) => {
                sqlx::query_as(
                    "SELECT SUM(delta) FROM orevents WHERE streamid = ? AND opcode = ?",
                )
                .bind(stream_id)
                .bind(opcode.code())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT SUM(delta) FROM orevents WHERE streamid = ?")
                    .bind(stream_id)
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(sum.0.unwrap_or(0))
    }

    /// Cross-stream view: events matching `opcodes`, grouped by a string
    /// field looked up in the payload. Rows whose payload will not parse are
    /// logged and skipped, they never fail the whole aggregate.
    pub async fn aggregate(
        &self,
        opcodes: &[Opcode],
        group_key: &str,
    ) -> StoreResult<Vec<AggregateRow>> {
        if opcodes.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; opcodes.len()].join(", ");
        let sql = format!(
            "SELECT * FROM orevents WHERE opcode IN ({placeholders}) ORDER BY ts, id"
        );

        let mut query = sqlx::query_as::<_, EventRow>(&sql);
        for opcode in opcodes {
            query = query.bind(opcode.code());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut groups: Vec<AggregateRow> = Vec::new();
        for row in rows {
            let payload = match &row.payload {
                Some(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(event = %row.id, %err, "skipping event with malformed payload");
                        continue;
                    }
                },
                None => continue,
            };

            let Some(key) = payload.get(group_key).and_then(|v| v.as_str()) else {
                continue;
            };

            match groups.iter_mut().find(|g| g.key == key) {
                Some(group) => {
                    group.events += 1;
                    group.total_delta += row.delta;
                }
                None => groups.push(AggregateRow {
                    key: key.to_string(),
                    events: 1,
                    total_delta: row.delta,
                }),
            }
        }

        Ok(groups)
    }

    pub async fn add_participant(
        &self,
        stream_id: &str,
        actor_id: &str,
        role: StreamRole,
    ) -> StoreResult<()> {
        ensure_row_exists(&self.pool, "streams", stream_id).await?;
        ensure_row_exists(&self.pool, "actors", actor_id).await?;

        sqlx::query(
            r#"
            INSERT INTO streamcollab (streamid, actorid, role, joinedat)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(streamid, actorid) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(stream_id)
        .bind(actor_id)
        .bind(role.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn participants(&self, stream_id: &str) -> StoreResult<Vec<StreamCollab>> {
        let rows: Vec<StreamCollabRow> =
            sqlx::query_as("SELECT * FROM streamcollab WHERE streamid = ? ORDER BY joinedat")
                .bind(stream_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|row| StreamCollab {
                role: StreamRole::from_str_loose(&row.role).unwrap_or(StreamRole::Participant),
                stream_id: row.streamid,
                actor_id: row.actorid,
                joined_at: parse_rfc3339(&row.joinedat),
            })
            .collect())
    }
}

/// Deterministic latest-event rule shared by every status-style projection:
/// greatest `ts` wins, equal timestamps broken by greater id so replicas
/// agree whatever order events arrived in.
pub fn latest_by_timestamp(events: &[OrEvent]) -> Option<&OrEvent> {
    events
        .iter()
        .max_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)))
}

pub(crate) async fn insert_stream_if_absent<'e, E>(
    executor: E,
    id: &str,
    scope: &str,
    created_by: &str,
) -> StoreResult<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO streams (id, scope, createdby, createdat) VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(scope)
    .bind(created_by)
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Bare insert, no pre-check: transactional callers validate the stream
/// themselves (usually by having just created it).
pub(crate) async fn insert_event<'e, E>(executor: E, event: &NewEvent) -> StoreResult<OrEvent>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = Uuid::new_v4().to_string();
    let ts = event.ts.unwrap_or_else(|| Utc::now().timestamp_millis());
    let payload = event
        .payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO orevents (id, streamid, opcode, refid, lat, lng, delta, payload, scope, status, ts)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&event.stream_id)
    .bind(event.opcode.code())
    .bind(&event.ref_id)
    .bind(event.lat)
    .bind(event.lng)
    .bind(event.delta)
    .bind(&payload)
    .bind(&event.scope)
    .bind(&event.status)
    .bind(ts)
    .execute(executor)
    .await?;

    Ok(OrEvent {
        id,
        stream_id: event.stream_id.clone(),
        opcode: event.opcode,
        ref_id: event.ref_id.clone(),
        lat: event.lat,
        lng: event.lng,
        delta: event.delta,
        payload: event.payload.clone(),
        scope: event.scope.clone(),
        status: event.status.clone(),
        ts,
    })
}

fn hydrate_event(row: EventRow) -> OrEvent {
    let payload = match row.payload {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(event = %row.id, %err, "dropping malformed event payload");
                None
            }
        },
        None => None,
    };

    OrEvent {
        id: row.id,
        stream_id: row.streamid,
        opcode: Opcode::from_code(row.opcode),
        ref_id: row.refid,
        lat: row.lat,
        lng: row.lng,
        delta: row.delta,
        payload,
        scope: row.scope,
        status: row.status,
        ts: row.ts,
    }
}

fn hydrate_stream(row: StreamRow) -> Stream {
    Stream {
        id: row.id,
        scope: row.scope,
        created_by: row.createdby,
        created_at: parse_rfc3339(&row.createdat),
    }
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
