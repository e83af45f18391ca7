use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Tagged event kind stored in `orevents.opcode`.
///
/// The numeric space is open on the wire: values this version does not
/// recognize round-trip through `Unknown` so newer peers can still sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// 401: cart line, delta carries the quantity.
    CartLine,
    /// 501: order line item, delta carries the quantity.
    OrderLine,
    /// 502: order paid.
    OrderPaid,
    /// 503: order shipped.
    OrderShipped,
    /// 504: order delivered.
    OrderDelivered,
    /// 505: order cancelled.
    OrderCancelled,
    /// 506: shipping address snapshot, payload carries the address.
    AddressSnapshot,
    /// 601: stock adjustment, delta carries the signed change.
    StockDelta,
    /// Anything else, preserved verbatim.
    Unknown(i64),
}

impl Opcode {
    pub const fn code(self) -> i64 {
        match self {
            Opcode::CartLine => 401,
            Opcode::OrderLine => 501,
            Opcode::OrderPaid => 502,
            Opcode::OrderShipped => 503,
            Opcode::OrderDelivered => 504,
            Opcode::OrderCancelled => 505,
            Opcode::AddressSnapshot => 506,
            Opcode::StockDelta => 601,
            Opcode::Unknown(code) => code,
        }
    }

    pub const fn from_code(code: i64) -> Self {
        match code {
            401 => Opcode::CartLine,
            501 => Opcode::OrderLine,
            502 => Opcode::OrderPaid,
            503 => Opcode::OrderShipped,
            504 => Opcode::OrderDelivered,
            505 => Opcode::OrderCancelled,
            506 => Opcode::AddressSnapshot,
            601 => Opcode::StockDelta,
            other => Opcode::Unknown(other),
        }
    }

    /// True for opcodes that participate in order status projection.
    ///
    /// 501 counts: an order stream holding only line items projects as
    /// freshly placed until a fulfillment event lands.
    pub const fn is_status(self) -> bool {
        matches!(
            self,
            Opcode::OrderLine
                | Opcode::OrderPaid
                | Opcode::OrderShipped
                | Opcode::OrderDelivered
                | Opcode::OrderCancelled
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Opcode::CartLine => "cart_line",
            Opcode::OrderLine => "order_line",
            Opcode::OrderPaid => "order_paid",
            Opcode::OrderShipped => "order_shipped",
            Opcode::OrderDelivered => "order_delivered",
            Opcode::OrderCancelled => "order_cancelled",
            Opcode::AddressSnapshot => "address_snapshot",
            Opcode::StockDelta => "stock_delta",
            Opcode::Unknown(_) => "unknown",
        }
    }
}

impl From<i64> for Opcode {
    fn from(code: i64) -> Self {
        Opcode::from_code(code)
    }
}

impl From<Opcode> for i64 {
    fn from(opcode: Opcode) -> Self {
        opcode.code()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}

// Stored and wired as the bare integer.
impl Serialize for Opcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for Opcode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Ok(Opcode::from_code(code))
    }
}
