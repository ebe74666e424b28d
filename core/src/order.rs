//! The order aggregate.
//!
//! An [`Order`] owns exactly one [`Delivery`], one [`Payment`], and any number
//! of [`Item`]s. All four are keyed by `order_uid` and are persisted and cached
//! together as one unit.
//!
//! The serde representation is the wire format of inbound messages and of the
//! read endpoint. Two fields are renamed on the wire: `shard_key` is `shardkey`
//! and `request_id` is `request`.
//!
//! # Example
//!
//! ```
//! use orderflow_core::order::Order;
//!
//! let payload = br#"{
//!     "order_uid": "b563feb7b2b84b6test",
//!     "track_number": "WBILMTESTTRACK",
//!     "entry": "WBIL",
//!     "delivery": {"name": "Test Testov", "phone": "+9720000000", "zip": "2639809",
//!                  "city": "Kiryat Mozkin", "address": "Ploshad Mira 15",
//!                  "region": "Kraiot", "email": "test@gmail.com"},
//!     "payment": {"transaction": "b563feb7b2b84b6test", "request": "", "currency": "USD",
//!                 "provider": "wbpay", "amount": 1817, "payment_dt": 1637907727,
//!                 "bank": "alpha", "delivery_cost": 1500, "goods_total": 317, "custom_fee": 0},
//!     "items": [],
//!     "locale": "en",
//!     "internal_signature": "",
//!     "customer_id": "test",
//!     "delivery_service": "meest",
//!     "shardkey": "9",
//!     "sm_id": 99,
//!     "date_created": "2021-11-26T06:22:19Z",
//!     "oof_shard": "1"
//! }"#;
//!
//! let order = Order::from_json(payload).unwrap();
//! assert_eq!(order.shard_key, "9");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons an inbound payload cannot become an [`Order`].
#[derive(Error, Debug)]
pub enum OrderDecodeError {
    /// The payload is not a valid order document.
    #[error("Invalid order JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed but has no identity.
    #[error("Order has an empty order_uid")]
    MissingOrderUid,
}

/// Order aggregate root together with its owned sub-entities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Globally unique, immutable identifier shared by every sub-entity.
    pub order_uid: String,
    /// Tracking number.
    pub track_number: String,
    /// Entry point code.
    pub entry: String,
    /// Recipient details.
    pub delivery: Delivery,
    /// Transaction details.
    pub payment: Payment,
    /// Line items (order is not significant).
    pub items: Vec<Item>,
    /// Customer locale.
    pub locale: String,
    /// Internal signature.
    pub internal_signature: String,
    /// Customer identifier.
    pub customer_id: String,
    /// Delivery service name.
    pub delivery_service: String,
    /// Shard key.
    #[serde(rename = "shardkey")]
    pub shard_key: String,
    /// Service marker id.
    pub sm_id: i32,
    /// Creation time reported by the producer.
    pub date_created: DateTime<Utc>,
    /// Out-of-flow shard.
    pub oof_shard: String,
}

/// The `orders` row: an [`Order`] without its sub-entities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Order identifier.
    pub order_uid: String,
    /// Tracking number.
    pub track_number: String,
    /// Entry point code.
    pub entry: String,
    /// Customer locale.
    pub locale: String,
    /// Internal signature.
    pub internal_signature: String,
    /// Customer identifier.
    pub customer_id: String,
    /// Delivery service name.
    pub delivery_service: String,
    /// Shard key.
    pub shard_key: String,
    /// Service marker id.
    pub sm_id: i32,
    /// Creation time.
    pub date_created: DateTime<Utc>,
    /// Out-of-flow shard.
    pub oof_shard: String,
}

/// Recipient and shipping attributes, one per order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Recipient name.
    pub name: String,
    /// Recipient phone.
    pub phone: String,
    /// Postal code.
    pub zip: String,
    /// City.
    pub city: String,
    /// Street address.
    pub address: String,
    /// Region.
    pub region: String,
    /// Contact email.
    pub email: String,
}

/// Transaction attributes, one per order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Transaction id.
    pub transaction: String,
    /// Request id.
    #[serde(rename = "request")]
    pub request_id: String,
    /// ISO currency code.
    pub currency: String,
    /// Payment provider.
    pub provider: String,
    /// Total amount charged.
    pub amount: f64,
    /// Payment time as a unix timestamp.
    pub payment_dt: i64,
    /// Bank name.
    pub bank: String,
    /// Delivery cost component.
    pub delivery_cost: f64,
    /// Goods total.
    pub goods_total: i32,
    /// Custom fee.
    pub custom_fee: f64,
}

/// One line item of an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Characteristic id.
    pub chrt_id: i64,
    /// Tracking number.
    pub track_number: String,
    /// Unit price.
    pub price: f64,
    /// Item reference id.
    pub rid: String,
    /// Product name.
    pub name: String,
    /// Discount percentage.
    pub sale: i32,
    /// Size label.
    pub size: String,
    /// Price after discount.
    pub total_price: f64,
    /// Nomenclature id.
    pub nm_id: i64,
    /// Brand.
    pub brand: String,
    /// Status code.
    pub status: i32,
}

impl Order {
    /// Decode an inbound message payload.
    ///
    /// # Errors
    ///
    /// Returns [`OrderDecodeError::Json`] if the payload is not an order
    /// document and [`OrderDecodeError::MissingOrderUid`] if `order_uid` is
    /// empty.
    pub fn from_json(payload: &[u8]) -> Result<Self, OrderDecodeError> {
        let order: Self = serde_json::from_slice(payload)?;
        if order.order_uid.trim().is_empty() {
            return Err(OrderDecodeError::MissingOrderUid);
        }
        Ok(order)
    }

    /// Reassemble an aggregate from its four persisted projections.
    ///
    /// Missing delivery or payment rows become empty sub-objects.
    #[must_use]
    pub fn assemble(
        record: OrderRecord,
        delivery: Option<Delivery>,
        payment: Option<Payment>,
        items: Vec<Item>,
    ) -> Self {
        Self {
            order_uid: record.order_uid,
            track_number: record.track_number,
            entry: record.entry,
            delivery: delivery.unwrap_or_default(),
            payment: payment.unwrap_or_default(),
            items,
            locale: record.locale,
            internal_signature: record.internal_signature,
            customer_id: record.customer_id,
            delivery_service: record.delivery_service,
            shard_key: record.shard_key,
            sm_id: record.sm_id,
            date_created: record.date_created,
            oof_shard: record.oof_shard,
        }
    }

    /// The `orders` row for this aggregate.
    #[must_use]
    pub fn record(&self) -> OrderRecord {
        OrderRecord {
            order_uid: self.order_uid.clone(),
            track_number: self.track_number.clone(),
            entry: self.entry.clone(),
            locale: self.locale.clone(),
            internal_signature: self.internal_signature.clone(),
            customer_id: self.customer_id.clone(),
            delivery_service: self.delivery_service.clone(),
            shard_key: self.shard_key.clone(),
            sm_id: self.sm_id,
            date_created: self.date_created,
            oof_shard: self.oof_shard.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire_order() -> serde_json::Value {
        json!({
            "order_uid": "b563feb7b2b84b6test",
            "track_number": "WBILMTESTTRACK",
            "entry": "WBIL",
            "delivery": {
                "name": "Test Testov",
                "phone": "+9720000000",
                "zip": "2639809",
                "city": "Kiryat Mozkin",
                "address": "Ploshad Mira 15",
                "region": "Kraiot",
                "email": "test@gmail.com"
            },
            "payment": {
                "transaction": "b563feb7b2b84b6test",
                "request": "req-1",
                "currency": "USD",
                "provider": "wbpay",
                "amount": 1817.0,
                "payment_dt": 1_637_907_727,
                "bank": "alpha",
                "delivery_cost": 1500.0,
                "goods_total": 317,
                "custom_fee": 0.0
            },
            "items": [{
                "chrt_id": 9_934_930,
                "track_number": "WBILMTESTTRACK",
                "price": 453.0,
                "rid": "ab4219087a764ae0btest",
                "name": "Mascaras",
                "sale": 30,
                "size": "0",
                "total_price": 317.0,
                "nm_id": 2_389_212,
                "brand": "Vivienne Sabo",
                "status": 202
            }],
            "locale": "en",
            "internal_signature": "",
            "customer_id": "test",
            "delivery_service": "meest",
            "shardkey": "9",
            "sm_id": 99,
            "date_created": "2021-11-26T06:22:19Z",
            "oof_shard": "1"
        })
    }

    #[test]
    fn decodes_renamed_wire_fields() {
        let payload = serde_json::to_vec(&wire_order()).unwrap();
        let order = Order::from_json(&payload).unwrap();

        assert_eq!(order.shard_key, "9");
        assert_eq!(order.payment.request_id, "req-1");
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].status, 202);
    }

    #[test]
    fn serializes_back_to_wire_names() {
        let payload = serde_json::to_vec(&wire_order()).unwrap();
        let order = Order::from_json(&payload).unwrap();
        let value = serde_json::to_value(&order).unwrap();

        assert_eq!(value["shardkey"], "9");
        assert_eq!(value["payment"]["request"], "req-1");
        assert!(value.get("shard_key").is_none());
    }

    #[test]
    fn rejects_non_order_payload() {
        let err = Order::from_json(b"{\"hello\": 1}").unwrap_err();
        assert!(matches!(err, OrderDecodeError::Json(_)));

        let err = Order::from_json(b"not json at all").unwrap_err();
        assert!(matches!(err, OrderDecodeError::Json(_)));
    }

    #[test]
    fn rejects_blank_order_uid() {
        let mut value = wire_order();
        value["order_uid"] = json!("  ");
        let payload = serde_json::to_vec(&value).unwrap();

        let err = Order::from_json(&payload).unwrap_err();
        assert!(matches!(err, OrderDecodeError::MissingOrderUid));
    }

    #[test]
    fn assemble_defaults_missing_sub_entities() {
        let payload = serde_json::to_vec(&wire_order()).unwrap();
        let order = Order::from_json(&payload).unwrap();

        let assembled = Order::assemble(order.record(), None, None, Vec::new());

        assert_eq!(assembled.order_uid, order.order_uid);
        assert_eq!(assembled.delivery, Delivery::default());
        assert_eq!(assembled.payment, Payment::default());
        assert!(assembled.items.is_empty());
    }

    #[test]
    fn assemble_inverts_record() {
        let payload = serde_json::to_vec(&wire_order()).unwrap();
        let order = Order::from_json(&payload).unwrap();

        let assembled = Order::assemble(
            order.record(),
            Some(order.delivery.clone()),
            Some(order.payment.clone()),
            order.items.clone(),
        );

        assert_eq!(assembled, order);
    }
}
