use sqlx::SqlitePool;

use super::error::{StoreError, StoreResult};
use super::ensure_row_exists;
use crate::models::Point;

pub struct PointRepository {
    pool: SqlitePool,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct PointRow {
    id: String,
    noderef: String,
    sellerid: String,
    sku: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    stock: String,
    price: Option<f64>,
    notes: Option<String>,
    version: i64,
}

/// Partial update: only supplied fields are written, and every update bumps
/// `version`. The stock cache is deliberately absent, stock moves only
/// through the inventory ledger.
#[derive(Debug, Default, Clone)]
pub struct PointUpdate {
    pub sku: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub price: Option<f64>,
    pub notes: Option<String>,
}

impl PointUpdate {
    fn is_empty(&self) -> bool {
        self.sku.is_none()
            && self.lat.is_none()
            && self.lon.is_none()
            && self.price.is_none()
            && self.notes.is_none()
    }
}

impl PointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, point: &Point) -> StoreResult<Point> {
        ensure_row_exists(&self.pool, "nodes", &point.node_ref).await?;
        ensure_row_exists(&self.pool, "actors", &point.seller_id).await?;

        sqlx::query(
            r#"
            INSERT INTO points (id, noderef, sellerid, sku, lat, lon, stock, price, notes, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&point.id)
        .bind(&point.node_ref)
        .bind(&point.seller_id)
        .bind(&point.sku)
        .bind(point.lat)
        .bind(point.lon)
        .bind(&point.stock)
        .bind(point.price)
        .bind(&point.notes)
        .bind(point.version)
        .execute(&self.pool)
        .await?;

        self.require(&point.id).await
    }

    pub async fn get_by_id(&self, id: &str) -> StoreResult<Option<Point>> {
        let row: Option<PointRow> = sqlx::query_as("SELECT * FROM points WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(hydrate_point))
    }

    pub async fn list_for_seller(&self, seller_id: &str) -> StoreResult<Vec<Point>> {
        let rows: Vec<PointRow> =
            sqlx::query_as("SELECT * FROM points WHERE sellerid = ? ORDER BY id")
                .bind(seller_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(hydrate_point).collect())
    }

    pub async fn list_for_node(&self, node_ref: &str) -> StoreResult<Vec<Point>> {
        let rows: Vec<PointRow> =
            sqlx::query_as("SELECT * FROM points WHERE noderef = ? ORDER BY id")
                .bind(node_ref)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(hydrate_point).collect())
    }

    pub async fn update(&self, id: &str, update: &PointUpdate) -> StoreResult<Point> {
        if update.is_empty() {
            return self.require(id).await;
        }

        let result = sqlx::query(
            r#"
            UPDATE points
            SET sku = COALESCE(?, sku),
                lat = COALESCE(?, lat),
                lon = COALESCE(?, lon),
                price = COALESCE(?, price),
                notes = COALESCE(?, notes),
                version = version + 1
            WHERE id = ?
            "#,
        )
        .bind(&update.sku)
        .bind(update.lat)
        .bind(update.lon)
        .bind(update.price)
        .bind(&update.notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                table: "points".to_string(),
                id: id.to_string(),
            });
        }

        self.require(id).await
    }

    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM points WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn require(&self, id: &str) -> StoreResult<Point> {
        self.get_by_id(id).await?.ok_or_else(|| StoreError::RowNotFound {
            table: "points".to_string(),
            id: id.to_string(),
        })
    }
}

fn hydrate_point(row: PointRow) -> Point {
    Point {
        id: row.id,
        node_ref: row.noderef,
        seller_id: row.sellerid,
        sku: row.sku,
        lat: row.lat,
        lon: row.lon,
        stock: row.stock,
        price: row.price,
        notes: row.notes,
        version: row.version,
    }
}
