use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::opcode::Opcode;

/// One immutable ledger record. Rows are write-once: state is always read
/// back out through projections, never by updating an event in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrEvent {
    pub id: String,
    pub stream_id: String,
    pub opcode: Opcode,
    pub ref_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub delta: i64,
    pub payload: Option<Value>,
    pub scope: Option<String>,
    pub status: Option<String>,
    /// Event time in epoch milliseconds, set by the writing device.
    pub ts: i64,
}

impl OrEvent {
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.ts).single()
    }
}

/// Input for `EventLedger::append_event`. The ledger assigns the id; `ts`
/// defaults to the local clock but offline writers may carry their own.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub stream_id: String,
    pub opcode: Opcode,
    pub ref_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub delta: i64,
    pub payload: Option<Value>,
    pub scope: Option<String>,
    pub status: Option<String>,
    pub ts: Option<i64>,
}

impl NewEvent {
    pub fn new(stream_id: impl Into<String>, opcode: impl Into<Opcode>) -> Self {
        Self {
            stream_id: stream_id.into(),
            opcode: opcode.into(),
            ref_id: None,
            lat: None,
            lng: None,
            delta: 0,
            payload: None,
            scope: None,
            status: None,
            ts: None,
        }
    }

    pub fn with_ref(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn with_location(mut self, lat: f64, lng: f64) -> Self {
        self.lat = Some(lat);
        self.lng = Some(lng);
        self
    }

    pub fn with_delta(mut self, delta: i64) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_event_defaults() {
        let event = NewEvent::new("cart_u1", Opcode::CartLine);
        assert_eq!(event.stream_id, "cart_u1");
        assert_eq!(event.opcode, Opcode::CartLine);
        assert_eq!(event.delta, 0);
        assert!(event.ts.is_none());
    }

    #[test]
    fn test_new_event_builder() {
        let event = NewEvent::new("order-9", 502)
            .with_ref("payment-77")
            .with_delta(1)
            .with_payload(json!({"method": "upi"}))
            .with_ts(1_700_000_000_000);
        assert_eq!(event.opcode, Opcode::OrderPaid);
        assert_eq!(event.ref_id.as_deref(), Some("payment-77"));
        assert_eq!(event.ts, Some(1_700_000_000_000));
    }

    #[test]
    fn test_occurred_at() {
        let event = OrEvent {
            id: "e1".into(),
            stream_id: "s1".into(),
            opcode: Opcode::StockDelta,
            ref_id: None,
            lat: None,
            lng: None,
            delta: 5,
            payload: None,
            scope: None,
            status: None,
            ts: 1_700_000_000_000,
        };
        let at = event.occurred_at().unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_000);
    }
}
