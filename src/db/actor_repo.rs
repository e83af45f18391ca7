use sqlx::SqlitePool;
use tracing::warn;

use super::error::{StoreError, StoreResult};
use super::{ensure_row_exists, parse_json_column};
use crate::models::{Actor, ActorType};

pub struct ActorRepository {
    pool: SqlitePool,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct ActorRow {
    id: String,
    parentid: Option<String>,
    actortype: String,
    globalcode: String,
    name: String,
    metadata: Option<String>,
    vector: Option<Vec<u8>>,
}

/// Partial update: only supplied fields are written.
#[derive(Debug, Default, Clone)]
pub struct ActorUpdate {
    pub name: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub vector: Option<Vec<u8>>,
}

impl ActorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, actor: &Actor) -> StoreResult<Actor> {
        if let Some(parent) = &actor.parent_id {
            ensure_row_exists(&self.pool, "actors", parent).await?;
        }

        let metadata = actor
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO actors (id, parentid, actortype, globalcode, name, metadata, vector)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&actor.id)
        .bind(&actor.parent_id)
        .bind(actor.actor_type.as_str())
        .bind(&actor.global_code)
        .bind(&actor.name)
        .bind(&metadata)
        .bind(&actor.vector)
        .execute(&self.pool)
        .await?;

        self.require(&actor.id).await
    }

    /// Login-time insert-or-update by id. Repeat logins refresh the handle
    /// and display name, everything else is left alone.
    pub async fn upsert_identity(
        &self,
        id: &str,
        global_code: &str,
        name: &str,
    ) -> StoreResult<Actor> {
        sqlx::query(
            r#"
            INSERT INTO actors (id, actortype, globalcode, name)
            VALUES (?, 'user', ?, ?)
            ON CONFLICT(id) DO UPDATE SET globalcode = excluded.globalcode, name = excluded.name
            "#,
        )
        .bind(id)
        .bind(global_code)
        .bind(name)
        .execute(&self.pool)
        .await?;

        self.require(id).await
    }

    pub async fn get_by_id(&self, id: &str) -> StoreResult<Option<Actor>> {
        let row: Option<ActorRow> = sqlx::query_as("SELECT * FROM actors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(hydrate_actor))
    }

    pub async fn get_by_global_code(&self, code: &str) -> StoreResult<Option<Actor>> {
        let row: Option<ActorRow> = sqlx::query_as("SELECT * FROM actors WHERE globalcode = ?")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(hydrate_actor))
    }

    pub async fn list_children(&self, parent_id: &str) -> StoreResult<Vec<Actor>> {
        let rows: Vec<ActorRow> =
            sqlx::query_as("SELECT * FROM actors WHERE parentid = ? ORDER BY name")
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(hydrate_actor).collect())
    }

    pub async fn update(&self, id: &str, update: &ActorUpdate) -> StoreResult<Actor> {
        let metadata = update
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE actors
            SET name = COALESCE(?, name),
                metadata = COALESCE(?, metadata),
                vector = COALESCE(?, vector)
            WHERE id = ?
            "#,
        )
        .bind(&update.name)
        .bind(&metadata)
        .bind(&update.vector)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                table: "actors".to_string(),
                id: id.to_string(),
            });
        }

        self.require(id).await
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM actors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn require(&self, id: &str) -> StoreResult<Actor> {
        self.get_by_id(id).await?.ok_or_else(|| StoreError::RowNotFound {
            table: "actors".to_string(),
            id: id.to_string(),
        })
    }
}

fn hydrate_actor(row: ActorRow) -> Actor {
    let actor_type = ActorType::from_str_loose(&row.actortype).unwrap_or_else(|| {
        warn!(id = %row.id, actortype = %row.actortype, "unknown actor type, treating as user");
        ActorType::User
    });

    Actor {
        metadata: parse_json_column("actors", &row.id, "metadata", row.metadata),
        id: row.id,
        parent_id: row.parentid,
        actor_type,
        global_code: row.globalcode,
        name: row.name,
        vector: row.vector,
    }
}
