//! Persistence boundary for order aggregates.
//!
//! An [`OrderStore`] writes the four projections of an [`Order`] atomically
//! and reads them back one at a time. Reassembly into an aggregate happens in
//! the read service, not here.

use crate::BoxFuture;
use crate::order::{Delivery, Item, Order, OrderRecord, Payment};
use thiserror::Error;

/// Errors returned by store implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A query or transaction failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A persisted row could not be decoded into the domain model.
    #[error("Corrupt row for order {order_uid}: {reason}")]
    Corrupt {
        /// Order whose rows failed to decode.
        order_uid: String,
        /// Decode failure.
        reason: String,
    },
}

/// Result of [`OrderStore::create_aggregate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// All four projections were written.
    Created,
    /// An order with this `order_uid` was already persisted; nothing was written.
    AlreadyExists,
}

/// Durable storage for order aggregates.
///
/// Writes are all-or-nothing: after `create_aggregate` returns an error, no
/// projection of that order is visible to readers. Re-creating an existing
/// order is not an error and leaves the stored rows untouched.
pub trait OrderStore: Send + Sync {
    /// Persist the order row, delivery, payment, and items in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the transaction cannot be committed. Nothing
    /// is persisted in that case.
    fn create_aggregate<'a>(&'a self, order: &'a Order)
    -> BoxFuture<'a, Result<CreateOutcome, StoreError>>;

    /// Fetch the `orders` row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn get_order<'a>(
        &'a self,
        order_uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<OrderRecord>, StoreError>>;

    /// Fetch the delivery row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn get_delivery<'a>(
        &'a self,
        order_uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<Delivery>, StoreError>>;

    /// Fetch the payment row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn get_payment<'a>(
        &'a self,
        order_uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<Payment>, StoreError>>;

    /// Fetch all item rows. Empty when the order has none or does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn list_items<'a>(&'a self, order_uid: &'a str) -> BoxFuture<'a, Result<Vec<Item>, StoreError>>;

    /// Up to `limit` order ids, newest `date_created` first, ties broken by
    /// `order_uid` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn list_recent_order_uids(&self, limit: usize) -> BoxFuture<'_, Result<Vec<String>, StoreError>>;

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if it is not.
    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>>;
}
