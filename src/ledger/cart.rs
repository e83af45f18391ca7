use serde_json::Value;
use sqlx::Sqlite;

use super::{latest_by_timestamp, EventLedger};
use crate::db::StoreResult;
use crate::models::{NewEvent, Opcode, OrEvent, Stream};

/// Carts live in one deterministic stream per actor, created lazily.
pub fn cart_stream_id(actor_id: &str) -> String {
    format!("cart_{actor_id}")
}

/// One entry in the grouped cart view: net quantity per referenced point,
/// carrying the most recent payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub ref_id: String,
    pub quantity: i64,
    pub payload: Option<Value>,
}

pub struct CartRepository {
    ledger: EventLedger,
}

impl CartRepository {
    pub fn new(ledger: EventLedger) -> Self {
        Self { ledger }
    }

    pub async fn ensure_cart(&self, actor_id: &str) -> StoreResult<Stream> {
        self.ledger
            .ensure_stream(&cart_stream_id(actor_id), "cart", actor_id)
            .await
    }

    /// Append a cart-line event. A negative quantity takes units back out,
    /// the view nets per ref_id.
    pub async fn add_line(
        &self,
        actor_id: &str,
        ref_id: &str,
        quantity: i64,
        payload: Option<Value>,
    ) -> StoreResult<OrEvent> {
        self.ensure_cart(actor_id).await?;

        let mut event = NewEvent::new(cart_stream_id(actor_id), Opcode::CartLine)
            .with_ref(ref_id)
            .with_delta(quantity);
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }

        self.ledger.append_event(&event).await
    }

    /// The one sanctioned hard delete in the ledger: dropping a line removes
    /// its cart events outright instead of appending a correction.
    pub async fn remove_line(&self, actor_id: &str, ref_id: &str) -> StoreResult<u64> {
        delete_cart_lines(self.ledger.pool(), &cart_stream_id(actor_id), Some(ref_id)).await
    }

    pub async fn clear(&self, actor_id: &str) -> StoreResult<u64> {
        delete_cart_lines(self.ledger.pool(), &cart_stream_id(actor_id), None).await
    }

    pub async fn quantity(&self, actor_id: &str) -> StoreResult<i64> {
        self.ledger
            .project_quantity(&cart_stream_id(actor_id), Some(Opcode::CartLine))
            .await
    }

    /// Net view of the cart: per-ref quantity sums, zero and negative lines
    /// dropped, payload taken from the latest event for the ref.
    pub async fn lines(&self, actor_id: &str) -> StoreResult<Vec<CartLine>> {
        let events = self
            .ledger
            .events_for_stream(&cart_stream_id(actor_id))
            .await?;

        let mut refs: Vec<String> = Vec::new();
        for event in &events {
            if event.opcode != Opcode::CartLine {
                continue;
            }
            let Some(ref_id) = &event.ref_id else { continue };
            if !refs.iter().any(|r| r == ref_id) {
                refs.push(ref_id.clone());
            }
        }

        let mut lines = Vec::new();
        for ref_id in refs {
            let group: Vec<OrEvent> = events
                .iter()
                .filter(|e| e.opcode == Opcode::CartLine && e.ref_id.as_deref() == Some(&ref_id))
                .cloned()
                .collect();

            let quantity: i64 = group.iter().map(|e| e.delta).sum();
            if quantity <= 0 {
                continue;
            }

            let payload = latest_by_timestamp(&group).and_then(|e| e.payload.clone());
            lines.push(CartLine {
                ref_id,
                quantity,
                payload,
            });
        }

        Ok(lines)
    }
}

pub(crate) async fn delete_cart_lines<'e, E>(
    executor: E,
    cart_id: &str,
    ref_id: Option<&str>,
) -> StoreResult<u64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = match ref_id {
        Some(ref_id) => {
            sqlx::query("DELETE FROM orevents WHERE streamid = ? AND opcode = 401 AND refid = ?")
                .bind(cart_id)
                .bind(ref_id)
                .execute(executor)
                .await?
        }
        None => {
            sqlx::query("DELETE FROM orevents WHERE streamid = ? AND opcode = 401")
                .bind(cart_id)
                .execute(executor)
                .await?
        }
    };

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_store;
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        cart: CartRepository,
        ledger: EventLedger,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    async fn setup_cart() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let pool = open_store(&temp_dir.path().join("test.db")).await.unwrap();
        let ledger = EventLedger::new(pool);
        TestContext {
            cart: CartRepository::new(ledger.clone()),
            ledger,
            _temp_dir: temp_dir,
        }
    }

    #[test]
    fn test_cart_stream_id_is_deterministic() {
        assert_eq!(cart_stream_id("u1"), "cart_u1");
        assert_eq!(cart_stream_id("u1"), cart_stream_id("u1"));
    }

    #[tokio::test]
    async fn test_add_line_creates_cart_lazily() {
        let ctx = setup_cart().await;

        ctx.cart.add_line("u1", "p1", 1, None).await.unwrap();

        let stream = ctx.ledger.get_stream("cart_u1").await.unwrap().unwrap();
        assert_eq!(stream.scope, "cart");
        assert_eq!(stream.created_by, "u1");
    }

    #[tokio::test]
    async fn test_quantity_accumulates() {
        let ctx = setup_cart().await;
        let cart = &ctx.cart;

        cart.add_line("u1", "p1", 2, None).await.unwrap();
        cart.add_line("u1", "p1", 1, None).await.unwrap();

        assert_eq!(cart.quantity("u1").await.unwrap(), 3);
        assert_eq!(ctx.ledger.event_count("cart_u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove_line_hard_deletes() {
        let ctx = setup_cart().await;
        let cart = &ctx.cart;

        cart.add_line("u1", "p1", 2, None).await.unwrap();
        cart.add_line("u1", "p2", 1, None).await.unwrap();

        let removed = cart.remove_line("u1", "p1").await.unwrap();
        assert_eq!(removed, 1);

        // Rows are gone, not corrected
        assert_eq!(ctx.ledger.event_count("cart_u1").await.unwrap(), 1);
        assert_eq!(cart.quantity("u1").await.unwrap(), 1);

        let lines = cart.lines("u1").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].ref_id, "p2");
    }

    #[tokio::test]
    async fn test_lines_group_with_latest_payload() {
        let ctx = setup_cart().await;
        let cart = &ctx.cart;

        cart.ensure_cart("u1").await.unwrap();
        ctx.ledger
            .append_event(
                &NewEvent::new("cart_u1", Opcode::CartLine)
                    .with_ref("p1")
                    .with_delta(2)
                    .with_payload(json!({"name": "Silver Bangle"}))
                    .with_ts(10),
            )
            .await
            .unwrap();
        ctx.ledger
            .append_event(
                &NewEvent::new("cart_u1", Opcode::CartLine)
                    .with_ref("p1")
                    .with_delta(1)
                    .with_payload(json!({"name": "Silver Bangle", "price": 2100}))
                    .with_ts(20),
            )
            .await
            .unwrap();

        let lines = cart.lines("u1").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 3);
        assert_eq!(lines[0].payload.as_ref().unwrap()["price"], 2100);
    }

    #[tokio::test]
    async fn test_lines_drop_netted_out_refs() {
        let ctx = setup_cart().await;
        let cart = &ctx.cart;

        cart.add_line("u1", "p1", 2, None).await.unwrap();
        cart.add_line("u1", "p1", -2, None).await.unwrap();
        cart.add_line("u1", "p2", 1, None).await.unwrap();

        let lines = cart.lines("u1").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].ref_id, "p2");
    }

    #[tokio::test]
    async fn test_clear_empties_cart() {
        let ctx = setup_cart().await;
        let cart = &ctx.cart;

        cart.add_line("u1", "p1", 2, None).await.unwrap();
        cart.add_line("u1", "p2", 1, None).await.unwrap();

        let removed = cart.clear("u1").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cart.quantity("u1").await.unwrap(), 0);
        assert!(cart.lines("u1").await.unwrap().is_empty());
    }
}
