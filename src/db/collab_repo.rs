use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::error::{StoreError, StoreResult};
use super::{ensure_row_exists, parse_json_column};
use crate::models::Collab;

pub struct CollabRepository {
    pool: SqlitePool,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct CollabRow {
    id: String,
    actorid: String,
    targettype: String,
    targetid: String,
    role: String,
    permissions: Option<String>,
    createdat: String,
    expiresat: Option<String>,
}

impl CollabRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn grant(&self, collab: &Collab) -> StoreResult<Collab> {
        ensure_row_exists(&self.pool, "actors", &collab.actor_id).await?;

        let permissions = collab
            .permissions
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO collab (id, actorid, targettype, targetid, role, permissions, createdat, expiresat)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&collab.id)
        .bind(&collab.actor_id)
        .bind(&collab.target_type)
        .bind(&collab.target_id)
        .bind(&collab.role)
        .bind(&permissions)
        .bind(collab.created_at.to_rfc3339())
        .bind(collab.expires_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        self.get_by_id(&collab.id)
            .await?
            .ok_or_else(|| StoreError::RowNotFound {
                table: "collab".to_string(),
                id: collab.id.clone(),
            })
    }

    pub async fn get_by_id(&self, id: &str) -> StoreResult<Option<Collab>> {
        let row: Option<CollabRow> = sqlx::query_as("SELECT * FROM collab WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(hydrate_collab))
    }

    /// Grants held by an actor, expired ones filtered out.
    pub async fn active_for_actor(&self, actor_id: &str) -> StoreResult<Vec<Collab>> {
        let rows: Vec<CollabRow> =
            sqlx::query_as("SELECT * FROM collab WHERE actorid = ? ORDER BY createdat")
                .bind(actor_id)
                .fetch_all(&self.pool)
                .await?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(hydrate_collab)
            .filter(|grant| !grant.is_expired_at(now))
            .collect())
    }

    pub async fn for_target(&self, target_type: &str, target_id: &str) -> StoreResult<Vec<Collab>> {
        let rows: Vec<CollabRow> = sqlx::query_as(
            "SELECT * FROM collab WHERE targettype = ? AND targetid = ? ORDER BY createdat",
        )
        .bind(target_type)
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(hydrate_collab)
            .filter(|grant| !grant.is_expired_at(now))
            .collect())
    }

    pub async fn revoke(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM collab WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn hydrate_collab(row: CollabRow) -> Collab {
    Collab {
        permissions: parse_json_column("collab", &row.id, "permissions", row.permissions),
        id: row.id,
        actor_id: row.actorid,
        target_type: row.targettype,
        target_id: row.targetid,
        role: row.role,
        created_at: parse_rfc3339(&row.createdat),
        expires_at: row.expiresat.as_deref().map(parse_rfc3339),
    }
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
