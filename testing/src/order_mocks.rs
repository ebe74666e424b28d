//! In-memory order store and dead-letter sink.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use orderflow_core::{
    BoxFuture, CreateOutcome, DeadLetter, DeadLetterSink, Delivery, Item, Order, OrderRecord,
    OrderStore, Payment, StoreError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// One of the four writes inside `create_aggregate`, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStage {
    /// The `orders` row.
    Order,
    /// The delivery row.
    Delivery,
    /// The payment row.
    Payment,
    /// The item rows.
    Items,
}

/// How many times each store method has been called.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `create_aggregate`
    pub create_aggregate: usize,
    /// `get_order`
    pub get_order: usize,
    /// `get_delivery`
    pub get_delivery: usize,
    /// `get_payment`
    pub get_payment: usize,
    /// `list_items`
    pub list_items: usize,
    /// `list_recent_order_uids`
    pub list_recent_order_uids: usize,
    /// `ping`
    pub ping: usize,
}

impl CallCounts {
    /// Sum of the four projection reads.
    #[must_use]
    pub const fn projection_reads(&self) -> usize {
        self.get_order + self.get_delivery + self.get_payment + self.list_items
    }
}

#[derive(Default)]
struct Tables {
    orders: HashMap<String, OrderRecord>,
    deliveries: HashMap<String, Delivery>,
    payments: HashMap<String, Payment>,
    items: HashMap<String, Vec<Item>>,
}

#[derive(Default)]
struct Faults {
    // Stage to fail at, and how many more writes should fail (`None` = forever).
    write: Option<(WriteStage, Option<usize>)>,
    reads: bool,
    ping: bool,
}

/// `HashMap`-backed [`OrderStore`].
///
/// A write applies its rows stage by stage under one lock and removes them
/// again if a later stage fails, mirroring a rolled-back transaction. Real
/// rollback is covered by the ignored `PostgreSQL` integration tests.
/// Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<Faults>>,
    calls: Arc<Mutex<CallCounts>>,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a complete aggregate without going through `create_aggregate`.
    pub fn insert(&self, order: &Order) {
        let mut tables = self.tables.lock().unwrap();
        let uid = order.order_uid.clone();
        tables.orders.insert(uid.clone(), order.record());
        tables.deliveries.insert(uid.clone(), order.delivery.clone());
        tables.payments.insert(uid.clone(), order.payment.clone());
        tables.items.insert(uid, order.items.clone());
    }

    /// Seed only the `orders` row, leaving the sub-entities absent.
    pub fn insert_record_only(&self, record: OrderRecord) {
        self.tables
            .lock()
            .unwrap()
            .orders
            .insert(record.order_uid.clone(), record);
    }

    /// Fail every subsequent write when it reaches `stage`.
    pub fn fail_writes_at(&self, stage: WriteStage) {
        self.faults.lock().unwrap().write = Some((stage, None));
    }

    /// Fail the next `times` writes at the first stage.
    pub fn fail_next_writes(&self, times: usize) {
        self.faults.lock().unwrap().write = Some((WriteStage::Order, Some(times)));
    }

    /// Make every read return an error.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.lock().unwrap().reads = fail;
    }

    /// Make `ping` return an error.
    pub fn fail_ping(&self, fail: bool) {
        self.faults.lock().unwrap().ping = fail;
    }

    /// Snapshot of call counters.
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        *self.calls.lock().unwrap()
    }

    /// Zero the call counters.
    pub fn reset_calls(&self) {
        *self.calls.lock().unwrap() = CallCounts::default();
    }

    /// Number of stored `orders` rows.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.tables.lock().unwrap().orders.len()
    }

    /// Whether any projection of `order_uid` is stored.
    #[must_use]
    pub fn has_any_row(&self, order_uid: &str) -> bool {
        let tables = self.tables.lock().unwrap();
        tables.orders.contains_key(order_uid)
            || tables.deliveries.contains_key(order_uid)
            || tables.payments.contains_key(order_uid)
            || tables.items.contains_key(order_uid)
    }

    fn count(&self, bump: impl FnOnce(&mut CallCounts)) {
        bump(&mut self.calls.lock().unwrap());
    }

    fn check_write(&self, stage: WriteStage) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().unwrap();
        let Some((fail_at, remaining)) = faults.write else {
            return Ok(());
        };
        if fail_at != stage {
            return Ok(());
        }
        match remaining {
            None => {}
            Some(0) => {
                faults.write = None;
                return Ok(());
            }
            Some(n) => faults.write = Some((fail_at, Some(n - 1))),
        }
        Err(StoreError::Database(format!("injected failure writing {stage:?}")))
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.faults.lock().unwrap().reads {
            return Err(StoreError::Database("injected read failure".to_string()));
        }
        Ok(())
    }

    fn write_aggregate(&self, order: &Order) -> Result<CreateOutcome, StoreError> {
        self.check_write(WriteStage::Order)?;
        let mut tables = self.tables.lock().unwrap();
        if tables.orders.contains_key(&order.order_uid) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        if let Err(e) = self.apply_rows(&mut tables, order) {
            // Roll back. The uid was absent, so every row under it is ours.
            let uid = order.order_uid.as_str();
            tables.orders.remove(uid);
            tables.deliveries.remove(uid);
            tables.payments.remove(uid);
            tables.items.remove(uid);
            return Err(e);
        }
        Ok(CreateOutcome::Created)
    }

    fn apply_rows(&self, tables: &mut Tables, order: &Order) -> Result<(), StoreError> {
        let uid = &order.order_uid;
        tables.orders.insert(uid.clone(), order.record());
        self.check_write(WriteStage::Delivery)?;
        tables.deliveries.insert(uid.clone(), order.delivery.clone());
        self.check_write(WriteStage::Payment)?;
        tables.payments.insert(uid.clone(), order.payment.clone());
        self.check_write(WriteStage::Items)?;
        tables.items.insert(uid.clone(), order.items.clone());
        Ok(())
    }
}

impl OrderStore for InMemoryOrderStore {
    fn create_aggregate<'a>(
        &'a self,
        order: &'a Order,
    ) -> BoxFuture<'a, Result<CreateOutcome, StoreError>> {
        self.count(|c| c.create_aggregate += 1);
        let result = self.write_aggregate(order);
        Box::pin(async move { result })
    }

    fn get_order<'a>(
        &'a self,
        order_uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<OrderRecord>, StoreError>> {
        self.count(|c| c.get_order += 1);
        let result = self
            .check_read()
            .map(|()| self.tables.lock().unwrap().orders.get(order_uid).cloned());
        Box::pin(async move { result })
    }

    fn get_delivery<'a>(
        &'a self,
        order_uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<Delivery>, StoreError>> {
        self.count(|c| c.get_delivery += 1);
        let result = self
            .check_read()
            .map(|()| self.tables.lock().unwrap().deliveries.get(order_uid).cloned());
        Box::pin(async move { result })
    }

    fn get_payment<'a>(
        &'a self,
        order_uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<Payment>, StoreError>> {
        self.count(|c| c.get_payment += 1);
        let result = self
            .check_read()
            .map(|()| self.tables.lock().unwrap().payments.get(order_uid).cloned());
        Box::pin(async move { result })
    }

    fn list_items<'a>(&'a self, order_uid: &'a str) -> BoxFuture<'a, Result<Vec<Item>, StoreError>> {
        self.count(|c| c.list_items += 1);
        let result = self.check_read().map(|()| {
            self.tables
                .lock()
                .unwrap()
                .items
                .get(order_uid)
                .cloned()
                .unwrap_or_default()
        });
        Box::pin(async move { result })
    }

    fn list_recent_order_uids(&self, limit: usize) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        self.count(|c| c.list_recent_order_uids += 1);
        let result = self.check_read().map(|()| {
            let tables = self.tables.lock().unwrap();
            let mut records: Vec<&OrderRecord> = tables.orders.values().collect();
            records.sort_by(|a, b| {
                b.date_created
                    .cmp(&a.date_created)
                    .then_with(|| a.order_uid.cmp(&b.order_uid))
            });
            records
                .into_iter()
                .take(limit)
                .map(|r| r.order_uid.clone())
                .collect()
        });
        Box::pin(async move { result })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        self.count(|c| c.ping += 1);
        let result = if self.faults.lock().unwrap().ping {
            Err(StoreError::Connection("injected ping failure".to_string()))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }
}

/// [`DeadLetterSink`] that keeps letters in memory.
#[derive(Clone, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
    fail: Arc<Mutex<bool>>,
    recorded: Arc<Notify>,
}

impl InMemoryDeadLetterSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `record` fail.
    pub fn fail_records(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    /// Everything recorded so far, oldest first.
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().unwrap().clone()
    }

    /// Wait until at least `count` letters have been recorded.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.recorded.notified();
            if self.letters.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn record<'a>(&'a self, letter: &'a DeadLetter) -> BoxFuture<'a, Result<(), StoreError>> {
        let result = if *self.fail.lock().unwrap() {
            Err(StoreError::Database("injected dead-letter failure".to_string()))
        } else {
            self.letters.lock().unwrap().push(letter.clone());
            self.recorded.notify_waiters();
            Ok(())
        };
        Box::pin(async move { result })
    }
}
