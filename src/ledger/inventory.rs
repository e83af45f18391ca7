use serde_json::Value;

use super::{insert_event, insert_stream_if_absent, EventLedger};
use crate::db::{PointRepository, StoreError, StoreResult};
use crate::models::{NewEvent, Opcode, OrEvent, Point};

/// Each point's stock history lives in one deterministic stream.
pub fn stock_stream_id(point_id: &str) -> String {
    format!("stock_{point_id}")
}

pub struct InventoryRepository {
    ledger: EventLedger,
}

impl InventoryRepository {
    pub fn new(ledger: EventLedger) -> Self {
        Self { ledger }
    }

    /// Apply a signed stock change. The cache write, the version bump, and
    /// the 601 ledger event commit together: the cache never moves without
    /// its event. Local changes may not drive the cache negative; merged
    /// histories from other devices still can, and `on_hand` reports them
    /// as they are.
    pub async fn adjust(
        &self,
        point_id: &str,
        delta: i64,
        note: Option<Value>,
    ) -> StoreResult<Point> {
        let pool = self.ledger.pool();
        let mut tx = pool.begin().await?;

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT stock, sellerid FROM points WHERE id = ?")
                .bind(point_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((stock, seller_id)) = row else {
            return Err(StoreError::RowNotFound {
                table: "points".to_string(),
                id: point_id.to_string(),
            });
        };

        let on_hand: i64 = stock.trim().parse().map_err(|_| StoreError::MalformedPayload {
            table: "points".to_string(),
            id: point_id.to_string(),
            column: "stock".to_string(),
            reason: format!("stock cache '{stock}' is not a number"),
        })?;

        let next = on_hand + delta;
        if next < 0 {
            return Err(StoreError::InsufficientStock {
                id: point_id.to_string(),
                have: on_hand,
                want: -delta,
            });
        }

        sqlx::query("UPDATE points SET stock = ?, version = version + 1 WHERE id = ?")
            .bind(next.to_string())
            .bind(point_id)
            .execute(&mut *tx)
            .await?;

        insert_stream_if_absent(&mut *tx, &stock_stream_id(point_id), "stock", &seller_id).await?;

        let mut event = NewEvent::new(stock_stream_id(point_id), Opcode::StockDelta)
            .with_ref(point_id)
            .with_delta(delta);
        if let Some(note) = note {
            event = event.with_payload(note);
        }
        insert_event(&mut *tx, &event).await?;

        tx.commit().await?;

        PointRepository::new(pool.clone())
            .get_by_id(point_id)
            .await?
            .ok_or_else(|| StoreError::RowNotFound {
                table: "points".to_string(),
                id: point_id.to_string(),
            })
    }

    /// Ledger truth: SUM of 601 deltas for the point.
    pub async fn on_hand(&self, point_id: &str) -> StoreResult<i64> {
        self.ledger
            .project_quantity(&stock_stream_id(point_id), Some(Opcode::StockDelta))
            .await
    }

    pub async fn history(&self, point_id: &str) -> StoreResult<Vec<OrEvent>> {
        self.ledger
            .events_for_stream(&stock_stream_id(point_id))
            .await
    }
}
