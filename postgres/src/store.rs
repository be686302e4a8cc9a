//! `PostgreSQL`-backed outbox store.

use chrono::{DateTime, Utc};
use outbox_relay_core::message::{ConcurrencyToken, OutboxMessage, OutboxStatus};
use outbox_relay_core::store::{OutboxStats, OutboxStore, OutboxStoreError};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::pin::Pin;

const INSERT_SQL: &str = r"
    INSERT INTO outbox_messages (
        id, event_id, type_key, version, occurred_on_utc, enqueued_at_utc,
        processed_at_utc, status, attempt_count, next_attempt_utc,
        locked_until_utc, locked_by, last_error, headers_json, payload_json,
        content_type, correlation_id, row_version
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
    ";

const SELECT_COLUMNS: &str = r"
    id, event_id, type_key, version, occurred_on_utc, enqueued_at_utc,
    processed_at_utc, status, attempt_count, next_attempt_utc,
    locked_until_utc, locked_by, last_error, headers_json, payload_json,
    content_type, correlation_id, row_version
    ";

/// `PostgreSQL`-based [`OutboxStore`].
///
/// Every mutation is a conditional `UPDATE ... WHERE id = $1 AND row_version
/// = $2` that also increments `row_version`, so concurrent workers coordinate
/// through ordinary row updates without advisory locks or `SELECT ... FOR
/// UPDATE`.
///
/// # Example
///
/// ```no_run
/// use outbox_relay_postgres::PostgresOutboxStore;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresOutboxStore::new(pool);
/// store.ensure_schema().await?;
/// # Ok(())
/// # }
/// ```
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL with a small default pool.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, OutboxStoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(db_err)?;

        Ok(Self::new(pool))
    }

    /// The underlying connection pool, for callers that share transactions
    /// with their business writes.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `outbox_messages` table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError::Database`] if DDL execution fails.
    pub async fn ensure_schema(&self) -> Result<(), OutboxStoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS outbox_messages (
                id UUID PRIMARY KEY,
                event_id UUID NOT NULL,
                type_key VARCHAR(256) NOT NULL,
                version INT NOT NULL,
                occurred_on_utc TIMESTAMPTZ NOT NULL,
                enqueued_at_utc TIMESTAMPTZ NOT NULL,
                processed_at_utc TIMESTAMPTZ,
                status TEXT NOT NULL,
                attempt_count INT NOT NULL,
                next_attempt_utc TIMESTAMPTZ NOT NULL,
                locked_until_utc TIMESTAMPTZ,
                locked_by VARCHAR(128),
                last_error TEXT,
                headers_json TEXT,
                payload_json TEXT NOT NULL,
                content_type TEXT NOT NULL,
                correlation_id VARCHAR(64),
                row_version BIGINT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_dispatch
             ON outbox_messages (status, next_attempt_utc)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_event_id ON outbox_messages (event_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_lease
             ON outbox_messages (locked_until_utc, locked_by)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::debug!("Outbox schema ensured");
        Ok(())
    }

    /// Insert captured records inside the caller's open transaction.
    ///
    /// This is the capture-side atomicity boundary: commit the transaction
    /// and the business write and its outbox records become visible
    /// together; roll back and neither does.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxStoreError::Database`] if an insert fails.
    pub async fn insert_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        messages: &[OutboxMessage],
    ) -> Result<(), OutboxStoreError> {
        for message in messages {
            bind_insert(sqlx::query(INSERT_SQL), message)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }
}

impl OutboxStore for PostgresOutboxStore {
    fn insert(
        &self,
        messages: Vec<OutboxMessage>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            Self::insert_in_tx(&mut tx, &messages).await?;
            tx.commit().await.map_err(db_err)?;

            metrics::counter!("outbox.store.inserted").increment(messages.len() as u64);
            tracing::debug!(count = messages.len(), "Outbox messages inserted");
            Ok(())
        })
    }

    fn select_candidates(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
            let rows = sqlx::query(&format!(
                r"
                SELECT {SELECT_COLUMNS}
                FROM outbox_messages
                WHERE next_attempt_utc <= $1
                  AND (
                    status = 'pending'
                    OR (
                        status = 'processing'
                        AND (locked_until_utc IS NULL OR locked_until_utc < $1)
                    )
                  )
                ORDER BY occurred_on_utc ASC, enqueued_at_utc ASC
                LIMIT $2
                "
            ))
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            rows.iter().map(row_to_message).collect()
        })
    }

    fn try_claim(
        &self,
        id: uuid::Uuid,
        expected: ConcurrencyToken,
        instance_id: String,
        lease_until: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE outbox_messages
                SET status = 'processing',
                    locked_by = $3,
                    locked_until_utc = $4,
                    row_version = row_version + 1
                WHERE id = $1 AND row_version = $2
                ",
            )
            .bind(id)
            .bind(expected.value())
            .bind(&instance_id)
            .bind(lease_until)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            if result.rows_affected() == 1 {
                return Ok(());
            }

            conflict_or_not_found(&self.pool, id).await
        })
    }

    fn get(
        &self,
        id: uuid::Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OutboxMessage>, OutboxStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM outbox_messages WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            row.as_ref().map(row_to_message).transpose()
        })
    }

    fn update(
        &self,
        message: OutboxMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxStoreError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE outbox_messages
                SET status = $2,
                    attempt_count = $3,
                    next_attempt_utc = $4,
                    locked_until_utc = $5,
                    locked_by = $6,
                    last_error = $7,
                    processed_at_utc = $8,
                    row_version = row_version + 1
                WHERE id = $1 AND row_version = $9
                ",
            )
            .bind(message.id)
            .bind(message.status.as_str())
            .bind(message.attempt_count)
            .bind(message.next_attempt_utc)
            .bind(message.locked_until_utc)
            .bind(&message.locked_by)
            .bind(&message.last_error)
            .bind(message.processed_at_utc)
            .bind(message.row_version.value())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            if result.rows_affected() == 1 {
                return Ok(());
            }

            conflict_or_not_found(&self.pool, message.id).await
        })
    }

    fn count_by_status(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<OutboxStats, OutboxStoreError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT status, COUNT(*) AS count FROM outbox_messages GROUP BY status",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            let mut stats = OutboxStats::default();
            for row in &rows {
                let status_str: String = row.get("status");
                let count: i64 = row.get("count");
                let count = u64::try_from(count).unwrap_or(0);

                match OutboxStatus::parse(&status_str).map_err(|e| {
                    OutboxStoreError::Database(e.to_string())
                })? {
                    OutboxStatus::Pending => stats.pending = count,
                    OutboxStatus::Processing => stats.processing = count,
                    OutboxStatus::Processed => stats.processed = count,
                    OutboxStatus::DeadLetter => stats.dead_letter = count,
                }
                stats.total += count;
            }

            Ok(stats)
        })
    }

    fn list_dead_letters(
        &self,
        take: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxMessage>, OutboxStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
            let rows = sqlx::query(&format!(
                r"
                SELECT {SELECT_COLUMNS}
                FROM outbox_messages
                WHERE status = 'dead_letter'
                ORDER BY enqueued_at_utc DESC
                LIMIT $1
                "
            ))
            .bind(take as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            rows.iter().map(row_to_message).collect()
        })
    }

    fn requeue(
        &self,
        ids: Vec<uuid::Uuid>,
        reset_attempts: bool,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, OutboxStoreError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE outbox_messages
                SET status = 'pending',
                    next_attempt_utc = $2,
                    locked_until_utc = NULL,
                    locked_by = NULL,
                    last_error = NULL,
                    attempt_count = CASE WHEN $3 THEN 0 ELSE attempt_count END,
                    row_version = row_version + 1
                WHERE id = ANY($1)
                ",
            )
            .bind(&ids)
            .bind(now)
            .bind(reset_attempts)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

            Ok(result.rows_affected())
        })
    }

    fn processed_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<uuid::Uuid>, OutboxStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
            let rows = sqlx::query(
                r"
                SELECT id
                FROM outbox_messages
                WHERE status = 'processed' AND processed_at_utc < $1
                ORDER BY processed_at_utc ASC
                LIMIT $2
                ",
            )
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            Ok(rows.iter().map(|row| row.get("id")).collect())
        })
    }

    fn delete(
        &self,
        ids: Vec<uuid::Uuid>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, OutboxStoreError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM outbox_messages WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

            Ok(result.rows_affected())
        })
    }
}

fn db_err(e: sqlx::Error) -> OutboxStoreError {
    OutboxStoreError::Database(e.to_string())
}

/// Resolve a zero-row conditional update into the precise error.
async fn conflict_or_not_found(pool: &PgPool, id: uuid::Uuid) -> Result<(), OutboxStoreError> {
    let exists = sqlx::query("SELECT 1 FROM outbox_messages WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;

    if exists.is_some() {
        Err(OutboxStoreError::ConcurrencyConflict { id })
    } else {
        Err(OutboxStoreError::NotFound(id))
    }
}

fn bind_insert<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    message: &'q OutboxMessage,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(message.id)
        .bind(message.event_id)
        .bind(&message.type_key)
        .bind(message.version)
        .bind(message.occurred_on_utc)
        .bind(message.enqueued_at_utc)
        .bind(message.processed_at_utc)
        .bind(message.status.as_str())
        .bind(message.attempt_count)
        .bind(message.next_attempt_utc)
        .bind(message.locked_until_utc)
        .bind(&message.locked_by)
        .bind(&message.last_error)
        .bind(&message.headers_json)
        .bind(&message.payload_json)
        .bind(&message.content_type)
        .bind(&message.correlation_id)
        .bind(message.row_version.value())
}

/// Convert a database row to an `OutboxMessage`.
fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<OutboxMessage, OutboxStoreError> {
    let status_str: String = row.get("status");
    let status =
        OutboxStatus::parse(&status_str).map_err(|e| OutboxStoreError::Database(e.to_string()))?;

    Ok(OutboxMessage {
        id: row.get("id"),
        event_id: row.get("event_id"),
        type_key: row.get("type_key"),
        version: row.get("version"),
        occurred_on_utc: row.get("occurred_on_utc"),
        enqueued_at_utc: row.get("enqueued_at_utc"),
        processed_at_utc: row.get("processed_at_utc"),
        status,
        attempt_count: row.get("attempt_count"),
        next_attempt_utc: row.get("next_attempt_utc"),
        locked_until_utc: row.get("locked_until_utc"),
        locked_by: row.get("locked_by"),
        last_error: row.get("last_error"),
        headers_json: row.get("headers_json"),
        payload_json: row.get("payload_json"),
        content_type: row.get("content_type"),
        correlation_id: row.get("correlation_id"),
        row_version: ConcurrencyToken::new(row.get("row_version")),
    })
}
