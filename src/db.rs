//! Database module
//!
//! Connection with bounded retry and schema creation for the ledger tables.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Ledger schema. Monetary columns are NUMERIC(15, 2); the CHECK constraints
/// back up the applier's balance and limit rules.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id          UUID PRIMARY KEY,
        type        TEXT NOT NULL CHECK (type IN ('CHECKING', 'SAVINGS')),
        number      TEXT NOT NULL UNIQUE,
        status      TEXT NOT NULL CHECK (status IN ('ACTIVE', 'BLOCKED')),
        balance     NUMERIC(15, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS credit_cards (
        id               UUID PRIMARY KEY,
        account_id       UUID NOT NULL REFERENCES accounts (id),
        number           TEXT NOT NULL UNIQUE,
        expiration_date  TIMESTAMPTZ NOT NULL,
        credit_limit     NUMERIC(15, 2) NOT NULL CHECK (credit_limit >= 0),
        available_limit  NUMERIC(15, 2) NOT NULL,
        statement_day    INTEGER NOT NULL,
        due_day          INTEGER NOT NULL,
        created_at       TIMESTAMPTZ NOT NULL,
        updated_at       TIMESTAMPTZ NOT NULL,
        CHECK (available_limit >= 0 AND available_limit <= credit_limit)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pix_keys (
        id          UUID PRIMARY KEY,
        account_id  UUID NOT NULL REFERENCES accounts (id),
        key_type    TEXT NOT NULL CHECK (key_type IN ('CPF', 'EMAIL', 'PHONE', 'RANDOM')),
        key         TEXT NOT NULL UNIQUE,
        status      TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id               UUID PRIMARY KEY,
        account_id       UUID NOT NULL REFERENCES accounts (id),
        type             TEXT NOT NULL,
        amount           NUMERIC(15, 2) NOT NULL CHECK (amount > 0),
        description      TEXT NOT NULL DEFAULT '',
        destination_key  TEXT,
        credit_card_id   UUID REFERENCES credit_cards (id),
        created_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions (account_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS transaction_rejections (
        transaction_id  UUID PRIMARY KEY,
        account_id      UUID NOT NULL,
        type            TEXT NOT NULL,
        amount          NUMERIC(15, 2) NOT NULL,
        reason          TEXT NOT NULL,
        rejected_at     TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        id          UUID PRIMARY KEY,
        account_id  UUID NOT NULL,
        type        TEXT NOT NULL,
        message     TEXT NOT NULL,
        read        BOOLEAN NOT NULL DEFAULT FALSE,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_notifications_account ON notifications (account_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS processed_events (
        event_id      UUID PRIMARY KEY,
        stream        TEXT NOT NULL,
        processed_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Tables that must exist once [`ensure_schema`] has run
const REQUIRED_TABLES: &[&str] = &[
    "accounts",
    "credit_cards",
    "pix_keys",
    "transactions",
    "transaction_rejections",
    "notifications",
    "processed_events",
];

/// Connect to the store, retrying a bounded number of times
pub async fn connect_with_retry(
    url: &str,
    max_connections: u32,
    attempts: u32,
    delay: Duration,
) -> Result<PgPool, sqlx::Error> {
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
        {
            Ok(pool) => {
                verify_connection(&pool).await?;
                return Ok(pool);
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    error = %e,
                    "Database connection failed, retrying in {:?} (attempt {}/{})",
                    delay,
                    attempt,
                    attempts
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(error = %e, attempts, "Database connection failed");
                return Err(e);
            }
        }
    }
}

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Create the ledger tables if they do not exist
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    if !check_schema(pool).await? {
        return Err(sqlx::Error::Protocol(
            "ledger schema is incomplete after creation".into(),
        ));
    }

    tracing::info!("Ledger schema ready");
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
