//! Dead-letter queue for messages the ingestion worker gave up on.
//!
//! Rows live in `failed_messages`, one per log position. Recording the same
//! position again updates the attempt count and error instead of adding a row.
//! Operators move entries from `pending` to `resolved` or `discarded`.

use chrono::{DateTime, Utc};
use orderflow_core::{
    BoxFuture, DeadLetter, DeadLetterReason, DeadLetterSink, MessagePosition, StoreError,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Triage status of a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedMessageStatus {
    /// Awaiting investigation.
    Pending,
    /// Handled, for example by republishing a corrected payload.
    Resolved,
    /// Deliberately dropped.
    Discarded,
}

impl FailedMessageStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::Database(format!("Invalid failed message status: {s}"))),
        }
    }
}

fn parse_reason(s: &str) -> Result<DeadLetterReason, StoreError> {
    match s {
        "malformed" => Ok(DeadLetterReason::Malformed),
        "retries_exhausted" => Ok(DeadLetterReason::RetriesExhausted),
        _ => Err(StoreError::Database(format!("Invalid dead letter reason: {s}"))),
    }
}

/// A row of `failed_messages`.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Row id.
    pub id: i64,
    /// Log position of the original message.
    pub position: MessagePosition,
    /// Original key.
    pub key: Option<Vec<u8>>,
    /// Original body.
    pub payload: Option<Vec<u8>>,
    /// Why it was dead-lettered.
    pub reason: DeadLetterReason,
    /// Last error text.
    pub error_message: String,
    /// Deliveries seen before giving up.
    pub attempts: i32,
    /// Triage status.
    pub status: FailedMessageStatus,
    /// First time this position was recorded.
    pub first_failed_at: DateTime<Utc>,
    /// Most recent time this position was recorded.
    pub last_failed_at: DateTime<Utc>,
    /// When it left `pending`.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator notes.
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed [`DeadLetterSink`].
///
/// # Example
///
/// ```no_run
/// use orderflow_postgres::{FailedMessageStatus, PostgresDeadLetterQueue};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = PostgresDeadLetterQueue::new(pool);
///
/// for failed in dlq.list_pending(100).await? {
///     println!("{} failed: {}", failed.position, failed.error_message);
///     dlq.update_status(failed.id, FailedMessageStatus::Discarded, Some("bad producer")).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresDeadLetterQueue {
    pool: PgPool,
}

impl PostgresDeadLetterQueue {
    /// Create a queue on `pool`. The schema comes from
    /// [`crate::PostgresOrderStore::migrate`].
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, letter: &DeadLetter) -> Result<i64, StoreError> {
        let attempts = i32::try_from(letter.attempts).unwrap_or(i32::MAX);
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_messages (
                topic, partition_id, message_offset, message_key, payload,
                reason, error_message, attempts
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (topic, partition_id, message_offset) DO UPDATE
            SET reason = EXCLUDED.reason,
                error_message = EXCLUDED.error_message,
                attempts = EXCLUDED.attempts,
                status = 'pending',
                last_failed_at = NOW()
            RETURNING id
            ",
        )
        .bind(&letter.position.topic)
        .bind(letter.position.partition)
        .bind(letter.position.offset)
        .bind(letter.key.as_deref())
        .bind(letter.payload.as_deref())
        .bind(letter.reason.as_str())
        .bind(&letter.error)
        .bind(attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to record dead letter: {e}")))?;

        tracing::warn!(
            dlq_id = id,
            position = %letter.position,
            reason = %letter.reason,
            attempts = letter.attempts,
            error = %letter.error,
            "Message added to dead-letter queue"
        );

        Ok(id)
    }

    /// Oldest pending entries first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedMessage>, StoreError> {
        self.list_by_status(FailedMessageStatus::Pending, limit).await
    }

    /// Entries with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: FailedMessageStatus,
        limit: usize,
    ) -> Result<Vec<FailedMessage>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, topic, partition_id, message_offset, message_key, payload,
                   reason, error_message, attempts, status,
                   first_failed_at, last_failed_at, resolved_at, resolution_notes
            FROM failed_messages
            WHERE status = $1
            ORDER BY first_failed_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_failed_message).collect()
    }

    /// Fetch one entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<FailedMessage>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, topic, partition_id, message_offset, message_key, payload,
                   reason, error_message, attempts, status,
                   first_failed_at, last_failed_at, resolved_at, resolution_notes
            FROM failed_messages
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_failed_message).transpose()
    }

    /// Move an entry to `status`. Leaving `pending` stamps `resolved_at`.
    ///
    /// Returns whether the entry exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    pub async fn update_status(
        &self,
        id: i64,
        status: FailedMessageStatus,
        notes: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE failed_messages
            SET status = $1,
                resolution_notes = COALESCE($2, resolution_notes),
                resolved_at = CASE WHEN $1 = 'pending' THEN NULL ELSE NOW() END
            WHERE id = $3
            ",
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let found = result.rows_affected() == 1;
        if found {
            tracing::info!(dlq_id = id, status = status.as_str(), "Dead letter status updated");
            metrics::counter!("orderflow_dead_letters_triaged_total", "status" => status.as_str())
                .increment(1);
        }
        Ok(found)
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_messages WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(count)
    }

    fn row_to_failed_message(row: &PgRow) -> Result<FailedMessage, StoreError> {
        let decode = |e: sqlx::Error| StoreError::Database(format!("Invalid failed_messages row: {e}"));

        let status: String = row.try_get("status").map_err(decode)?;
        let reason: String = row.try_get("reason").map_err(decode)?;

        Ok(FailedMessage {
            id: row.try_get("id").map_err(decode)?,
            position: MessagePosition {
                topic: row.try_get("topic").map_err(decode)?,
                partition: row.try_get("partition_id").map_err(decode)?,
                offset: row.try_get("message_offset").map_err(decode)?,
            },
            key: row.try_get("message_key").map_err(decode)?,
            payload: row.try_get("payload").map_err(decode)?,
            reason: parse_reason(&reason)?,
            error_message: row.try_get("error_message").map_err(decode)?,
            attempts: row.try_get("attempts").map_err(decode)?,
            status: FailedMessageStatus::parse(&status)?,
            first_failed_at: row.try_get("first_failed_at").map_err(decode)?,
            last_failed_at: row.try_get("last_failed_at").map_err(decode)?,
            resolved_at: row.try_get("resolved_at").map_err(decode)?,
            resolution_notes: row.try_get("resolution_notes").map_err(decode)?,
        })
    }
}

impl DeadLetterSink for PostgresDeadLetterQueue {
    fn record<'a>(&'a self, letter: &'a DeadLetter) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.insert(letter).await?;
            Ok(())
        })
    }
}
