use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sellable offering of a catalog Node by one seller, optionally pinned to
/// a geographic location. `stock` mirrors the upstream schema: a numeric
/// string cache of the on-hand count, authoritative history lives in the
/// ledger's 601 events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub id: String,
    pub node_ref: String,
    pub seller_id: String,
    pub sku: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub stock: String,
    pub price: Option<f64>,
    pub notes: Option<String>,
    pub version: i64,
}

impl Point {
    pub fn new(node_ref: impl Into<String>, seller_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_ref: node_ref.into(),
            seller_id: seller_id.into(),
            sku: None,
            lat: None,
            lon: None,
            stock: "0".to_string(),
            price: None,
            notes: None,
            version: 1,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Parses the numeric-string stock cache. None when the cache holds
    /// something unparseable (a corrupt or foreign write).
    pub fn stock_level(&self) -> Option<i64> {
        self.stock.trim().parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_new() {
        let point = Point::new("n1", "seller1");
        assert_eq!(point.node_ref, "n1");
        assert_eq!(point.seller_id, "seller1");
        assert_eq!(point.stock, "0");
        assert_eq!(point.version, 1);
    }

    #[test]
    fn test_point_builder() {
        let point = Point::new("n1", "seller1")
            .with_sku("RING-S-925")
            .with_location(28.6139, 77.2090)
            .with_price(1499.0)
            .with_notes("display case 3");
        assert_eq!(point.sku.as_deref(), Some("RING-S-925"));
        assert_eq!(point.lat, Some(28.6139));
        assert_eq!(point.price, Some(1499.0));
    }

    #[test]
    fn test_stock_level_parsing() {
        let mut point = Point::new("n1", "s1");
        point.stock = "12".to_string();
        assert_eq!(point.stock_level(), Some(12));

        point.stock = " -3 ".to_string();
        assert_eq!(point.stock_level(), Some(-3));

        point.stock = "lots".to_string();
        assert_eq!(point.stock_level(), None);
    }
}
