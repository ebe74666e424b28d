//! Random orders for load and smoke testing.

use chrono::{DateTime, Utc};
use orderflow_core::{Delivery, Item, Order, Payment};
use rand::Rng;
use rand::seq::SliceRandom;

const CITIES: &[&str] = &[
    "Moscow",
    "Saint Petersburg",
    "Novosibirsk",
    "Yekaterinburg",
    "Kazan",
    "Nizhny Novgorod",
    "Samara",
    "Omsk",
];
const NAMES: &[&str] = &[
    "Ivan Petrov",
    "Maria Sidorova",
    "Alexey Kozlov",
    "Elena Volkova",
    "Dmitry Smirnov",
    "Anna Kuznetsova",
];
const BRANDS: &[&str] = &["Nike", "Adidas", "Puma", "Reebok", "New Balance", "Vans"];
const PRODUCTS: &[&str] = &["T-Shirt", "Jeans", "Sneakers", "Jacket", "Hoodie", "Backpack"];
const BANKS: &[&str] = &["Sberbank", "VTB", "Alfa Bank", "Raiffeisen", "Tinkoff"];
const SIZES: &[&str] = &["XS", "S", "M", "L", "XL"];
const DELIVERY_SERVICES: &[&str] = &["cdek", "boxberry", "pickpoint", "dhl"];
const LOCALES: &[&str] = &["ru", "en"];

fn pick<R: Rng + ?Sized>(rng: &mut R, choices: &[&str]) -> String {
    choices.choose(rng).copied().unwrap_or_default().to_string()
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build a complete, internally consistent order created at `now`.
///
/// The payment amount equals the item totals plus delivery cost, and every
/// item shares the order's track number.
pub fn random_order<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> Order {
    let order_uid = format!("order_{}_{:04}", now.timestamp(), rng.gen_range(0..10_000));
    let track_number = format!("TRACK{:06}", rng.gen_range(0..1_000_000));

    let item_count = rng.gen_range(1..=3);
    let items: Vec<Item> = (0..item_count)
        .map(|_| {
            let price = round_cents(rng.gen_range(500.0..5500.0));
            let sale = rng.gen_range(0..50);
            Item {
                chrt_id: rng.gen_range(1_000_000..2_000_000),
                track_number: track_number.clone(),
                price,
                rid: format!("rid_{}", rng.gen_range(0..1_000_000)),
                name: pick(rng, PRODUCTS),
                sale,
                size: pick(rng, SIZES),
                total_price: round_cents(price * f64::from(100 - sale) / 100.0),
                nm_id: rng.gen_range(1_000_000..11_000_000),
                brand: pick(rng, BRANDS),
                status: rng.gen_range(200..=202),
            }
        })
        .collect();

    let delivery_cost = f64::from(rng.gen_range(200_i32..1200));
    let goods_total: f64 = items.iter().map(|i| i.total_price).sum();

    Order {
        track_number,
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: pick(rng, NAMES),
            phone: format!("+7{}", rng.gen_range(1_000_000_000_u64..10_000_000_000)),
            zip: rng.gen_range(100_000..1_000_000).to_string(),
            city: pick(rng, CITIES),
            address: format!(
                "Street {}, Building {}",
                rng.gen_range(1..=100),
                rng.gen_range(1..=200)
            ),
            region: "Central".to_string(),
            email: format!("user{}@example.com", rng.gen_range(0..10_000)),
        },
        payment: Payment {
            transaction: order_uid.clone(),
            request_id: format!("req_{}", rng.gen_range(0..1_000_000)),
            currency: "RUB".to_string(),
            provider: "wbpay".to_string(),
            amount: round_cents(goods_total + delivery_cost),
            payment_dt: now.timestamp(),
            bank: pick(rng, BANKS),
            delivery_cost,
            goods_total: rng.gen_range(0..100),
            custom_fee: f64::from(rng.gen_range(0_i32..100)),
        },
        items,
        locale: pick(rng, LOCALES),
        internal_signature: String::new(),
        customer_id: format!("customer_{}", rng.gen_range(0..100_000)),
        delivery_service: pick(rng, DELIVERY_SERVICES),
        shard_key: rng.gen_range(0..10).to_string(),
        sm_id: rng.gen_range(1..=1000),
        date_created: now,
        oof_shard: "1".to_string(),
        order_uid,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn order_is_consistent() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = Utc::now();

        for _ in 0..50 {
            let order = random_order(&mut rng, now);
            assert!(order.order_uid.starts_with("order_"));
            assert_eq!(order.payment.transaction, order.order_uid);
            assert!((1..=3).contains(&order.items.len()));
            assert!(order.items.iter().all(|i| i.track_number == order.track_number));
            let items_total: f64 = order.items.iter().map(|i| i.total_price).sum();
            let expected = items_total + order.payment.delivery_cost;
            assert!((order.payment.amount - expected).abs() < 0.01);
        }
    }

    #[test]
    fn order_survives_the_wire() {
        let mut rng = StdRng::seed_from_u64(42);
        let order = random_order(&mut rng, Utc::now());

        let payload = through_wire(&order);
        assert_eq!(payload.order_uid, order.order_uid);
        assert_eq!(payload.items.len(), order.items.len());
    }

    fn through_wire(order: &Order) -> Order {
        let bytes = orderflow_testing::fixtures::order_payload(order);
        Order::from_json(&bytes).unwrap()
    }
}
