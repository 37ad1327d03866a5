//! PostgreSQL-backed event log
//!
//! Records live in `event_log`, keyed by `(stream, log_offset)`; the next
//! offset is taken as `MAX + 1` and a concurrent append that takes the same
//! offset fails on the primary key and is retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::domain::Stream;

use super::{EventLog, EventLogError, LogRecord};

/// PostgreSQL SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS event_log (
        stream       TEXT        NOT NULL,
        log_offset   BIGINT      NOT NULL,
        record_key   TEXT        NOT NULL,
        payload      BYTEA       NOT NULL,
        appended_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (stream, log_offset)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS event_log_cursors (
        stream            TEXT        NOT NULL,
        consumer_group    TEXT        NOT NULL,
        committed_offset  BIGINT      NOT NULL,
        updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (stream, consumer_group)
    )
    "#,
];

/// Event log stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the first reachable broker in the list and make sure the log
    /// tables exist
    pub async fn connect(brokers: &[String], max_connections: u32) -> Result<Self, EventLogError> {
        let mut last_error = String::from("empty broker list");

        for broker in brokers {
            match PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .connect(broker)
                .await
            {
                Ok(pool) => {
                    tracing::info!(broker = %redact(broker), "Connected to event log broker");
                    let log = Self::new(pool);
                    log.ensure_schema().await?;
                    return Ok(log);
                }
                Err(e) => {
                    tracing::warn!(broker = %redact(broker), error = %e, "Event log broker unreachable");
                    last_error = e.to_string();
                }
            }
        }

        Err(EventLogError::NoBrokerReachable {
            brokers: brokers
                .iter()
                .map(|b| redact(b))
                .collect::<Vec<_>>()
                .join(","),
            last_error,
        })
    }

    pub async fn ensure_schema(&self) -> Result<(), EventLogError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Single append attempt
    async fn try_append(
        &self,
        stream: Stream,
        key: &str,
        payload: &[u8],
    ) -> Result<i64, EventLogError> {
        let mut tx = self.pool.begin().await?;

        // The append is acknowledged only after the WAL is flushed
        sqlx::query("SET LOCAL synchronous_commit = on")
            .execute(&mut *tx)
            .await?;

        let offset: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO event_log (stream, log_offset, record_key, payload)
            SELECT $1, COALESCE(MAX(log_offset), 0) + 1, $2, $3
            FROM event_log
            WHERE stream = $1
            RETURNING log_offset
            "#,
        )
        .bind(stream.name())
        .bind(key)
        .bind(payload)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_append_error(stream, e))?;

        tx.commit().await.map_err(|e| map_append_error(stream, e))?;

        Ok(offset)
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(
        &self,
        stream: Stream,
        key: &str,
        payload: &[u8],
    ) -> Result<i64, EventLogError> {
        const MAX_RETRIES: u32 = 3;

        for attempt in 0..MAX_RETRIES {
            match self.try_append(stream, key, payload).await {
                Ok(offset) => return Ok(offset),
                Err(EventLogError::OffsetConflict(_)) if attempt < MAX_RETRIES - 1 => {
                    let delay = Duration::from_millis(50 * (attempt as u64 + 1));
                    tokio::time::sleep(delay).await;
                    tracing::warn!(
                        stream = %stream,
                        "Offset conflict, retrying append (attempt {}/{})",
                        attempt + 1,
                        MAX_RETRIES
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(EventLogError::OffsetConflict(stream))
    }

    async fn fetch(
        &self,
        stream: Stream,
        group: &str,
    ) -> Result<Option<LogRecord>, EventLogError> {
        let row: Option<(i64, String, Vec<u8>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT log_offset, record_key, payload, appended_at
            FROM event_log
            WHERE stream = $1
              AND log_offset > COALESCE(
                  (SELECT committed_offset FROM event_log_cursors
                   WHERE stream = $1 AND consumer_group = $2),
                  0)
            ORDER BY log_offset ASC
            LIMIT 1
            "#,
        )
        .bind(stream.name())
        .bind(group)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(offset, key, payload, appended_at)| LogRecord {
            stream,
            offset,
            key,
            payload,
            appended_at,
        }))
    }

    async fn commit(&self, stream: Stream, group: &str, offset: i64) -> Result<(), EventLogError> {
        sqlx::query(
            r#"
            INSERT INTO event_log_cursors (stream, consumer_group, committed_offset)
            VALUES ($1, $2, $3)
            ON CONFLICT (stream, consumer_group) DO UPDATE
            SET committed_offset = GREATEST(event_log_cursors.committed_offset, EXCLUDED.committed_offset),
                updated_at = NOW()
            "#,
        )
        .bind(stream.name())
        .bind(group)
        .bind(offset)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn map_append_error(stream: Stream, err: sqlx::Error) -> EventLogError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return EventLogError::OffsetConflict(stream);
        }
    }
    EventLogError::Database(err)
}

/// Strip credentials from a connection URL before logging it
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
