//! Sample orders.

use chrono::{DateTime, TimeZone, Utc};
use orderflow_core::{Delivery, Item, Order, Payment};

/// Creation time used by [`sample_order`]: 2021-11-26 06:22:19 UTC.
#[must_use]
pub fn default_created_at() -> DateTime<Utc> {
    Utc.timestamp_opt(1_637_907_739, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// A complete order with one item, identified by `order_uid`.
#[must_use]
pub fn sample_order(order_uid: &str) -> Order {
    sample_order_at(order_uid, default_created_at())
}

/// Like [`sample_order`] but with an explicit `date_created`.
#[must_use]
pub fn sample_order_at(order_uid: &str, date_created: DateTime<Utc>) -> Order {
    Order {
        order_uid: order_uid.to_string(),
        track_number: "WBILMTESTTRACK".to_string(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: order_uid.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817.0,
            payment_dt: 1_637_907_727,
            bank: "alpha".to_string(),
            delivery_cost: 1500.0,
            goods_total: 317,
            custom_fee: 0.0,
        },
        items: vec![sample_item(9_934_930)],
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shard_key: "9".to_string(),
        sm_id: 99,
        date_created,
        oof_shard: "1".to_string(),
    }
}

/// A line item with the given characteristic id.
#[must_use]
pub fn sample_item(chrt_id: i64) -> Item {
    Item {
        chrt_id,
        track_number: "WBILMTESTTRACK".to_string(),
        price: 453.0,
        rid: format!("ab4219087a764ae0btest-{chrt_id}"),
        name: "Mascaras".to_string(),
        sale: 30,
        size: "0".to_string(),
        total_price: 317.0,
        nm_id: 2_389_212,
        brand: "Vivienne Sabo".to_string(),
        status: 202,
    }
}

/// The JSON wire payload for `order`.
#[must_use]
pub fn order_payload(order: &Order) -> Vec<u8> {
    serde_json::to_vec(order).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn payload_decodes_to_same_order() {
        let order = sample_order("fixture-1");
        let decoded = Order::from_json(&order_payload(&order)).unwrap();
        assert_eq!(decoded, order);
    }
}
