//! Transactional order store.

use orderflow_core::{
    BoxFuture, CreateOutcome, Delivery, Item, Order, OrderRecord, OrderStore, Payment, StoreError,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;

/// Connection pool sizing.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// How long to wait for a connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// [`OrderStore`] backed by `PostgreSQL`.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the database is unreachable.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Self::connect_with(database_url, &PoolConfig::default()).await
    }

    /// Connect with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the database is unreachable.
    pub async fn connect_with(database_url: &str, config: &PoolConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self::from_pool(pool))
    }

    /// Create the order and failed-message tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_aggregate(&self, order: &Order) -> Result<CreateOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to start transaction: {e}")))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to set isolation level: {e}")))?;

        if !insert_order(&mut tx, order).await? {
            // Dropping the transaction rolls it back; nothing was written.
            tracing::debug!(order_uid = %order.order_uid, "Order already persisted");
            return Ok(CreateOutcome::AlreadyExists);
        }
        insert_delivery(&mut tx, &order.order_uid, &order.delivery).await?;
        insert_payment(&mut tx, &order.order_uid, &order.payment).await?;
        for item in &order.items {
            insert_item(&mut tx, &order.order_uid, item).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to commit transaction: {e}")))?;

        tracing::debug!(
            order_uid = %order.order_uid,
            items = order.items.len(),
            "Order aggregate persisted"
        );

        Ok(CreateOutcome::Created)
    }
}

/// Returns `false` when the order row already existed.
async fn insert_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r"
        INSERT INTO orders (
            order_uid, track_number, entry, locale, internal_signature,
            customer_id, delivery_service, shard_key, sm_id, date_created, oof_shard
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (order_uid) DO NOTHING
        ",
    )
    .bind(&order.order_uid)
    .bind(&order.track_number)
    .bind(&order.entry)
    .bind(&order.locale)
    .bind(&order.internal_signature)
    .bind(&order.customer_id)
    .bind(&order.delivery_service)
    .bind(&order.shard_key)
    .bind(order.sm_id)
    .bind(order.date_created)
    .bind(&order.oof_shard)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to insert order: {e}")))?;

    Ok(result.rows_affected() == 1)
}

async fn insert_delivery(
    tx: &mut Transaction<'_, Postgres>,
    order_uid: &str,
    delivery: &Delivery,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO deliveries (order_uid, name, phone, zip, city, address, region, email)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ",
    )
    .bind(order_uid)
    .bind(&delivery.name)
    .bind(&delivery.phone)
    .bind(&delivery.zip)
    .bind(&delivery.city)
    .bind(&delivery.address)
    .bind(&delivery.region)
    .bind(&delivery.email)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to insert delivery: {e}")))?;
    Ok(())
}

async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    order_uid: &str,
    payment: &Payment,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO payments (
            order_uid, transaction, request_id, currency, provider, amount,
            payment_dt, bank, delivery_cost, goods_total, custom_fee
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ",
    )
    .bind(order_uid)
    .bind(&payment.transaction)
    .bind(&payment.request_id)
    .bind(&payment.currency)
    .bind(&payment.provider)
    .bind(payment.amount)
    .bind(payment.payment_dt)
    .bind(&payment.bank)
    .bind(payment.delivery_cost)
    .bind(payment.goods_total)
    .bind(payment.custom_fee)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to insert payment: {e}")))?;
    Ok(())
}

async fn insert_item(
    tx: &mut Transaction<'_, Postgres>,
    order_uid: &str,
    item: &Item,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO items (
            order_uid, chrt_id, track_number, price, rid, name,
            sale, size, total_price, nm_id, brand, status
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ",
    )
    .bind(order_uid)
    .bind(item.chrt_id)
    .bind(&item.track_number)
    .bind(item.price)
    .bind(&item.rid)
    .bind(&item.name)
    .bind(item.sale)
    .bind(&item.size)
    .bind(item.total_price)
    .bind(item.nm_id)
    .bind(&item.brand)
    .bind(item.status)
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Database(format!("Failed to insert item: {e}")))?;
    Ok(())
}

fn corrupt(order_uid: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Corrupt {
        order_uid: order_uid.to_string(),
        reason: e.to_string(),
    }
}

fn record_from_row(row: &PgRow) -> Result<OrderRecord, sqlx::Error> {
    Ok(OrderRecord {
        order_uid: row.try_get("order_uid")?,
        track_number: row.try_get("track_number")?,
        entry: row.try_get("entry")?,
        locale: row.try_get("locale")?,
        internal_signature: row.try_get("internal_signature")?,
        customer_id: row.try_get("customer_id")?,
        delivery_service: row.try_get("delivery_service")?,
        shard_key: row.try_get("shard_key")?,
        sm_id: row.try_get("sm_id")?,
        date_created: row.try_get("date_created")?,
        oof_shard: row.try_get("oof_shard")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, sqlx::Error> {
    Ok(Delivery {
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        zip: row.try_get("zip")?,
        city: row.try_get("city")?,
        address: row.try_get("address")?,
        region: row.try_get("region")?,
        email: row.try_get("email")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, sqlx::Error> {
    Ok(Payment {
        transaction: row.try_get("transaction")?,
        request_id: row.try_get("request_id")?,
        currency: row.try_get("currency")?,
        provider: row.try_get("provider")?,
        amount: row.try_get("amount")?,
        payment_dt: row.try_get("payment_dt")?,
        bank: row.try_get("bank")?,
        delivery_cost: row.try_get("delivery_cost")?,
        goods_total: row.try_get("goods_total")?,
        custom_fee: row.try_get("custom_fee")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        chrt_id: row.try_get("chrt_id")?,
        track_number: row.try_get("track_number")?,
        price: row.try_get("price")?,
        rid: row.try_get("rid")?,
        name: row.try_get("name")?,
        sale: row.try_get("sale")?,
        size: row.try_get("size")?,
        total_price: row.try_get("total_price")?,
        nm_id: row.try_get("nm_id")?,
        brand: row.try_get("brand")?,
        status: row.try_get("status")?,
    })
}

impl OrderStore for PostgresOrderStore {
    fn create_aggregate<'a>(
        &'a self,
        order: &'a Order,
    ) -> BoxFuture<'a, Result<CreateOutcome, StoreError>> {
        Box::pin(self.write_aggregate(order))
    }

    fn get_order<'a>(
        &'a self,
        order_uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<OrderRecord>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT order_uid, track_number, entry, locale, internal_signature,
                       customer_id, delivery_service, shard_key, sm_id, date_created, oof_shard
                FROM orders
                WHERE order_uid = $1
                ",
            )
            .bind(order_uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to load order: {e}")))?;

            row.as_ref()
                .map(record_from_row)
                .transpose()
                .map_err(corrupt(order_uid))
        })
    }

    fn get_delivery<'a>(
        &'a self,
        order_uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<Delivery>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT name, phone, zip, city, address, region, email
                FROM deliveries
                WHERE order_uid = $1
                ",
            )
            .bind(order_uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to load delivery: {e}")))?;

            row.as_ref()
                .map(delivery_from_row)
                .transpose()
                .map_err(corrupt(order_uid))
        })
    }

    fn get_payment<'a>(
        &'a self,
        order_uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<Payment>, StoreError>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT transaction, request_id, currency, provider, amount,
                       payment_dt, bank, delivery_cost, goods_total, custom_fee
                FROM payments
                WHERE order_uid = $1
                ",
            )
            .bind(order_uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to load payment: {e}")))?;

            row.as_ref()
                .map(payment_from_row)
                .transpose()
                .map_err(corrupt(order_uid))
        })
    }

    fn list_items<'a>(&'a self, order_uid: &'a str) -> BoxFuture<'a, Result<Vec<Item>, StoreError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT chrt_id, track_number, price, rid, name, sale,
                       size, total_price, nm_id, brand, status
                FROM items
                WHERE order_uid = $1
                ORDER BY id ASC
                ",
            )
            .bind(order_uid)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to load items: {e}")))?;

            rows.iter()
                .map(item_from_row)
                .collect::<Result<Vec<_>, _>>()
                .map_err(corrupt(order_uid))
        })
    }

    fn list_recent_order_uids(&self, limit: usize) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let uids: Vec<(String,)> = sqlx::query_as(
                r"
                SELECT order_uid
                FROM orders
                ORDER BY date_created DESC, order_uid ASC
                LIMIT $1
                ",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to list recent orders: {e}")))?;

            Ok(uids.into_iter().map(|(uid,)| uid).collect())
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Connection(format!("Ping failed: {e}")))?;
            Ok(())
        })
    }
}
