use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::cart::{cart_stream_id, delete_cart_lines, CartRepository};
use super::{insert_event, EventLedger};
use crate::db::{ensure_row_exists, StoreResult};
use crate::models::{NewEvent, Opcode, OrEvent, Stream, StreamRole};

/// One line of a new order, referencing the Point being bought.
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub point_id: String,
    pub quantity: i64,
    pub payload: Option<Value>,
}

impl OrderLine {
    pub fn new(point_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            point_id: point_id.into(),
            quantity,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub buyer_id: String,
    pub lines: Vec<OrderLine>,
    pub ship_to: Option<Value>,
}

impl NewOrder {
    pub fn new(buyer_id: impl Into<String>) -> Self {
        Self {
            buyer_id: buyer_id.into(),
            lines: Vec::new(),
            ship_to: None,
        }
    }

    pub fn with_line(mut self, line: OrderLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn with_ship_to(mut self, address: Value) -> Self {
        self.ship_to = Some(address);
        self
    }
}

pub struct OrderRepository {
    ledger: EventLedger,
}

impl OrderRepository {
    pub fn new(ledger: EventLedger) -> Self {
        Self { ledger }
    }

    /// Place an order: the stream, its line items, the optional shipping
    /// snapshot, and the buyer's owner membership land in one transaction.
    pub async fn checkout(&self, order: &NewOrder) -> StoreResult<Stream> {
        let pool = self.ledger.pool();

        ensure_row_exists(pool, "actors", &order.buyer_id).await?;
        for line in &order.lines {
            ensure_row_exists(pool, "points", &line.point_id).await?;
        }

        let order_id = Uuid::new_v4().to_string();
        let mut tx = pool.begin().await?;

        sqlx::query("INSERT INTO streams (id, scope, createdby, createdat) VALUES (?, 'order', ?, ?)")
            .bind(&order_id)
            .bind(&order.buyer_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        for line in &order.lines {
            let mut event = NewEvent::new(&order_id, Opcode::OrderLine)
                .with_ref(&line.point_id)
                .with_delta(line.quantity);
            if let Some(payload) = &line.payload {
                event = event.with_payload(payload.clone());
            }
            insert_event(&mut *tx, &event).await?;
        }

        if let Some(address) = &order.ship_to {
            let snapshot =
                NewEvent::new(&order_id, Opcode::AddressSnapshot).with_payload(address.clone());
            insert_event(&mut *tx, &snapshot).await?;
        }

        sqlx::query(
            "INSERT INTO streamcollab (streamid, actorid, role, joinedat) VALUES (?, ?, ?, ?)",
        )
        .bind(&order_id)
        .bind(&order.buyer_id)
        .bind(StreamRole::Owner.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.ledger
            .get_stream(&order_id)
            .await?
            .ok_or_else(|| crate::db::StoreError::RowNotFound {
                table: "streams".to_string(),
                id: order_id,
            })
    }

    /// Drain the buyer's cart into an order. Cart lines are netted first;
    /// the line events and the cart deletion commit together, so a crash
    /// leaves either both or neither. Returns None for an empty cart.
    pub async fn checkout_cart(
        &self,
        buyer_id: &str,
        ship_to: Option<Value>,
    ) -> StoreResult<Option<Stream>> {
        let cart = CartRepository::new(self.ledger.clone());
        let lines = cart.lines(buyer_id).await?;
        if lines.is_empty() {
            return Ok(None);
        }

        let pool = self.ledger.pool();
        ensure_row_exists(pool, "actors", buyer_id).await?;

        let order_id = Uuid::new_v4().to_string();
        let mut tx = pool.begin().await?;

        sqlx::query("INSERT INTO streams (id, scope, createdby, createdat) VALUES (?, 'order', ?, ?)")
            .bind(&order_id)
            .bind(buyer_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        for line in &lines {
            let mut event = NewEvent::new(&order_id, Opcode::OrderLine)
                .with_ref(&line.ref_id)
                .with_delta(line.quantity);
            if let Some(payload) = &line.payload {
                event = event.with_payload(payload.clone());
            }
            insert_event(&mut *tx, &event).await?;
        }

        if let Some(address) = &ship_to {
            let snapshot =
                NewEvent::new(&order_id, Opcode::AddressSnapshot).with_payload(address.clone());
            insert_event(&mut *tx, &snapshot).await?;
        }

        sqlx::query(
            "INSERT INTO streamcollab (streamid, actorid, role, joinedat) VALUES (?, ?, ?, ?)",
        )
        .bind(&order_id)
        .bind(buyer_id)
        .bind(StreamRole::Owner.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        delete_cart_lines(&mut *tx, &cart_stream_id(buyer_id), None).await?;

        tx.commit().await?;

        self.ledger.get_stream(&order_id).await
    }

    pub async fn mark_paid(&self, order_id: &str, payload: Option<Value>) -> StoreResult<OrEvent> {
        self.record(order_id, Opcode::OrderPaid, payload).await
    }

    pub async fn mark_shipped(
        &self,
        order_id: &str,
        payload: Option<Value>,
    ) -> StoreResult<OrEvent> {
        self.record(order_id, Opcode::OrderShipped, payload).await
    }

    pub async fn mark_delivered(
        &self,
        order_id: &str,
        payload: Option<Value>,
    ) -> StoreResult<OrEvent> {
        self.record(order_id, Opcode::OrderDelivered, payload).await
    }

    pub async fn cancel(&self, order_id: &str, payload: Option<Value>) -> StoreResult<OrEvent> {
        self.record(order_id, Opcode::OrderCancelled, payload).await
    }

    /// Current status by the latest-timestamp rule. A fresh order projects
    /// as its line opcode until a fulfillment event lands.
    pub async fn status(&self, order_id: &str) -> StoreResult<Option<Opcode>> {
        self.ledger.project_status(order_id).await
    }

    pub async fn item_count(&self, order_id: &str) -> StoreResult<i64> {
        self.ledger
            .project_quantity(order_id, Some(Opcode::OrderLine))
            .await
    }

    pub async fn events(&self, order_id: &str) -> StoreResult<Vec<OrEvent>> {
        self.ledger.events_for_stream(order_id).await
    }

    pub async fn orders_for_buyer(&self, buyer_id: &str) -> StoreResult<Vec<Stream>> {
        let rows: Vec<super::StreamRow> = sqlx::query_as(
            "SELECT * FROM streams WHERE scope = 'order' AND createdby = ? ORDER BY createdat DESC",
        )
        .bind(buyer_id)
        .fetch_all(self.ledger.pool())
        .await?;

        Ok(rows.into_iter().map(super::hydrate_stream).collect())
    }

    async fn record(
        &self,
        order_id: &str,
        opcode: Opcode,
        payload: Option<Value>,
    ) -> StoreResult<OrEvent> {
        let mut event = NewEvent::new(order_id, opcode);
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }
        self.ledger.append_event(&event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_store, ActorRepository, NodeRepository, PointRepository, StoreError};
    use crate::models::{Actor, ActorType, Node, NodeType, Point};
    use serde_json::json;
    use sqlx::SqlitePool;
    use tempfile::TempDir;
    use tokio::time::{sleep, Duration};

    struct TestContext {
        orders: OrderRepository,
        cart: CartRepository,
        ledger: EventLedger,
        pool: SqlitePool,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    async fn setup_orders() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = open_store(&temp_dir.path().join("test.db")).await.unwrap();

        ActorRepository::new(pool.clone())
            .create(&Actor::new("u1", ActorType::User, "asha@example.com", "Asha"))
            .await
            .unwrap();
        NodeRepository::new(pool.clone())
            .create(&Node::new(NodeType::Product, "Silver Bangle").with_id("n1"))
            .await
            .unwrap();
        PointRepository::new(pool.clone())
            .create(&Point::new("n1", "u1").with_id("p1").with_price(2100.0))
            .await
            .unwrap();
        PointRepository::new(pool.clone())
            .create(&Point::new("n1", "u1").with_id("p2").with_price(900.0))
            .await
            .unwrap();

        let ledger = EventLedger::new(pool.clone());
        TestContext {
            orders: OrderRepository::new(ledger.clone()),
            cart: CartRepository::new(ledger.clone()),
            ledger,
            pool,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_checkout_writes_everything_in_one_order() {
        let ctx = setup_orders().await;

        let order = NewOrder::new("u1")
            .with_line(OrderLine::new("p1", 2).with_payload(json!({"seller": "u1"})))
            .with_line(OrderLine::new("p2", 1))
            .with_ship_to(json!({"line1": "12 Bazaar Lane", "city": "Jaipur"}));

        let stream = ctx.orders.checkout(&order).await.unwrap();
        assert_eq!(stream.scope, "order");
        assert_eq!(stream.created_by, "u1");

        let events = ctx.orders.events(&stream.id).await.unwrap();
        let line_count = events
            .iter()
            .filter(|e| e.opcode == Opcode::OrderLine)
            .count();
        let snapshot_count = events
            .iter()
            .filter(|e| e.opcode == Opcode::AddressSnapshot)
            .count();
        assert_eq!(line_count, 2);
        assert_eq!(snapshot_count, 1);

        assert_eq!(ctx.orders.item_count(&stream.id).await.unwrap(), 3);
        assert_eq!(
            ctx.orders.status(&stream.id).await.unwrap(),
            Some(Opcode::OrderLine)
        );

        let participants = ctx.ledger.participants(&stream.id).await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].actor_id, "u1");
        assert_eq!(participants[0].role, StreamRole::Owner);
    }

    #[tokio::test]
    async fn test_checkout_rejects_unknown_point_without_writing() {
        let ctx = setup_orders().await;

        let order = NewOrder::new("u1").with_line(OrderLine::new("p-ghost", 1));
        let err = ctx.orders.checkout(&order).await.unwrap_err();
        match err {
            StoreError::MissingReference { table, id } => {
                assert_eq!(table, "points");
                assert_eq!(id, "p-ghost");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let (streams,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM streams")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(streams, 0);
        let (events,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orevents")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(events, 0);
    }

    #[tokio::test]
    async fn test_checkout_rejects_unknown_buyer() {
        let ctx = setup_orders().await;

        let order = NewOrder::new("ghost").with_line(OrderLine::new("p1", 1));
        let err = ctx.orders.checkout(&order).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingReference { .. }));
    }

    #[tokio::test]
    async fn test_status_follows_fulfillment() {
        let ctx = setup_orders().await;

        let order = NewOrder::new("u1").with_line(OrderLine::new("p1", 1));
        let stream = ctx.orders.checkout(&order).await.unwrap();

        sleep(Duration::from_millis(5)).await;
        ctx.orders
            .mark_paid(&stream.id, Some(json!({"method": "upi"})))
            .await
            .unwrap();
        assert_eq!(
            ctx.orders.status(&stream.id).await.unwrap(),
            Some(Opcode::OrderPaid)
        );

        sleep(Duration::from_millis(5)).await;
        ctx.orders.mark_shipped(&stream.id, None).await.unwrap();
        assert_eq!(
            ctx.orders.status(&stream.id).await.unwrap(),
            Some(Opcode::OrderShipped)
        );

        sleep(Duration::from_millis(5)).await;
        ctx.orders.mark_delivered(&stream.id, None).await.unwrap();
        assert_eq!(
            ctx.orders.status(&stream.id).await.unwrap(),
            Some(Opcode::OrderDelivered)
        );
    }

    #[tokio::test]
    async fn test_cancel_wins_when_latest() {
        let ctx = setup_orders().await;

        let order = NewOrder::new("u1").with_line(OrderLine::new("p1", 1));
        let stream = ctx.orders.checkout(&order).await.unwrap();

        sleep(Duration::from_millis(5)).await;
        ctx.orders.mark_paid(&stream.id, None).await.unwrap();
        sleep(Duration::from_millis(5)).await;
        ctx.orders.cancel(&stream.id, None).await.unwrap();

        assert_eq!(
            ctx.orders.status(&stream.id).await.unwrap(),
            Some(Opcode::OrderCancelled)
        );
    }

    #[tokio::test]
    async fn test_checkout_cart_drains_cart() {
        let ctx = setup_orders().await;

        ctx.cart
            .add_line("u1", "p1", 2, Some(json!({"name": "Silver Bangle"})))
            .await
            .unwrap();
        ctx.cart.add_line("u1", "p1", 1, None).await.unwrap();
        ctx.cart.add_line("u1", "p2", 1, None).await.unwrap();

        let stream = ctx
            .orders
            .checkout_cart("u1", Some(json!({"city": "Jaipur"})))
            .await
            .unwrap()
            .unwrap();

        // Netted: p1 x3 and p2 x1 as two lines
        let events = ctx.orders.events(&stream.id).await.unwrap();
        let lines: Vec<_> = events
            .iter()
            .filter(|e| e.opcode == Opcode::OrderLine)
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(ctx.orders.item_count(&stream.id).await.unwrap(), 4);

        // The cart is empty afterwards
        assert_eq!(ctx.cart.quantity("u1").await.unwrap(), 0);

        // Nothing left to check out
        assert!(ctx.orders.checkout_cart("u1", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orders_for_buyer() {
        let ctx = setup_orders().await;

        let order = NewOrder::new("u1").with_line(OrderLine::new("p1", 1));
        ctx.orders.checkout(&order).await.unwrap();
        ctx.orders.checkout(&order).await.unwrap();

        let orders = ctx.orders.orders_for_buyer("u1").await.unwrap();
        assert_eq!(orders.len(), 2);
        assert!(ctx.orders.orders_for_buyer("nobody").await.unwrap().is_empty());
    }
}
