//! PostgreSQL ledger store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, Amount, Balance, CreditCard, Notification, PixKey, Stream,
    Transaction, TransactionRejection,
};

use super::{LedgerDiscrepancy, LedgerEntity, LedgerStore, StoreError, StoreTransaction};

// =========================================================================
// Row mapping
// =========================================================================

type AccountRow = (Uuid, String, String, String, Decimal, DateTime<Utc>, DateTime<Utc>);

type CardRow = (
    Uuid,
    Uuid,
    String,
    DateTime<Utc>,
    Decimal,
    Decimal,
    i32,
    i32,
    DateTime<Utc>,
    DateTime<Utc>,
);

type PixKeyRow = (Uuid, Uuid, String, String, String, DateTime<Utc>, DateTime<Utc>);

type TransactionRow = (
    Uuid,
    Uuid,
    String,
    Decimal,
    String,
    Option<String>,
    Option<Uuid>,
    DateTime<Utc>,
);

type RejectionRow = (Uuid, Uuid, String, Decimal, String, DateTime<Utc>);

type NotificationRow = (Uuid, Uuid, String, String, bool, DateTime<Utc>);

const ACCOUNT_COLUMNS: &str = "id, type, number, status, balance, created_at, updated_at";

const CARD_COLUMNS: &str = "id, account_id, number, expiration_date, credit_limit, \
     available_limit, statement_day, due_day, created_at, updated_at";

fn account_from_row(row: AccountRow) -> Result<Account, StoreError> {
    let (id, account_type, number, status, balance, created_at, updated_at) = row;
    Ok(Account {
        id,
        account_type: account_type
            .parse()
            .map_err(|e| StoreError::corrupt("accounts", e))?,
        number,
        status: status.parse().map_err(|e| StoreError::corrupt("accounts", e))?,
        balance: Balance::new(balance).map_err(|e| StoreError::corrupt("accounts", e))?,
        created_at,
        updated_at,
    })
}

fn card_from_row(row: CardRow) -> Result<CreditCard, StoreError> {
    let (
        id,
        account_id,
        number,
        expiration_date,
        credit_limit,
        available_limit,
        statement_day,
        due_day,
        created_at,
        updated_at,
    ) = row;
    Ok(CreditCard {
        id,
        account_id,
        number,
        expiration_date,
        credit_limit: Balance::new(credit_limit)
            .map_err(|e| StoreError::corrupt("credit_cards", e))?,
        available_limit: Balance::new(available_limit)
            .map_err(|e| StoreError::corrupt("credit_cards", e))?,
        statement_day,
        due_day,
        created_at,
        updated_at,
    })
}

fn pix_key_from_row(row: PixKeyRow) -> Result<PixKey, StoreError> {
    let (id, account_id, key_type, key, status, created_at, updated_at) = row;
    Ok(PixKey {
        id,
        account_id,
        key_type: key_type.parse().map_err(|e| StoreError::corrupt("pix_keys", e))?,
        key,
        status: status.parse().map_err(|e| StoreError::corrupt("pix_keys", e))?,
        created_at,
        updated_at,
    })
}

fn transaction_from_row(row: TransactionRow) -> Result<Transaction, StoreError> {
    let (id, account_id, kind, amount, description, destination_key, credit_card_id, created_at) =
        row;
    Ok(Transaction {
        id,
        account_id,
        transaction_type: kind
            .parse()
            .map_err(|e| StoreError::corrupt("transactions", e))?,
        amount: Amount::new(amount).map_err(|e| StoreError::corrupt("transactions", e))?,
        description,
        destination_key,
        credit_card_id,
        created_at,
    })
}

fn rejection_from_row(row: RejectionRow) -> Result<TransactionRejection, StoreError> {
    let (transaction_id, account_id, kind, amount, reason, rejected_at) = row;
    Ok(TransactionRejection {
        transaction_id,
        account_id,
        transaction_type: kind
            .parse()
            .map_err(|e| StoreError::corrupt("transaction_rejections", e))?,
        amount: Amount::new(amount)
            .map_err(|e| StoreError::corrupt("transaction_rejections", e))?,
        reason: reason
            .parse()
            .map_err(|e| StoreError::corrupt("transaction_rejections", e))?,
        rejected_at,
    })
}

fn notification_from_row(row: NotificationRow) -> Result<Notification, StoreError> {
    let (id, account_id, kind, message, read, created_at) = row;
    Ok(Notification {
        id,
        account_id,
        kind: kind.parse().map_err(|e| StoreError::corrupt("notifications", e))?,
        message,
        read,
        created_at,
    })
}

// =========================================================================
// PgStore
// =========================================================================

/// Ledger store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(account_from_row)
            .transpose()
    }

    async fn get_credit_card(&self, id: Uuid) -> Result<Option<CreditCard>, StoreError> {
        let sql = format!("SELECT {} FROM credit_cards WHERE id = $1", CARD_COLUMNS);
        sqlx::query_as::<_, CardRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(card_from_row)
            .transpose()
    }

    async fn get_pix_key(&self, id: Uuid) -> Result<Option<PixKey>, StoreError> {
        sqlx::query_as::<_, PixKeyRow>(
            r#"
            SELECT id, account_id, key_type, key, status, created_at, updated_at
            FROM pix_keys
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(pix_key_from_row)
        .transpose()
    }

    async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, account_id, type, amount, description, destination_key,
                   credit_card_id, created_at
            FROM transactions
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(transaction_from_row)
        .collect()
    }

    async fn list_rejections(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<TransactionRejection>, StoreError> {
        sqlx::query_as::<_, RejectionRow>(
            r#"
            SELECT transaction_id, account_id, type, amount, reason, rejected_at
            FROM transaction_rejections
            WHERE account_id = $1
            ORDER BY rejected_at DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(rejection_from_row)
        .collect()
    }

    async fn list_notifications(&self, account_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, account_id, type, message, read, created_at
            FROM notifications
            WHERE account_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(notification_from_row)
        .collect()
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, account_id, type, message, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(notification.id)
        .bind(notification.account_id)
        .bind(notification.kind.as_str())
        .bind(&notification.message)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_notifications_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn ledger_discrepancies(&self) -> Result<Vec<LedgerDiscrepancy>, StoreError> {
        let accounts: Vec<(Uuid, Decimal, Decimal)> = sqlx::query_as(
            r#"
            SELECT id, balance, expected FROM (
                SELECT a.id, a.balance,
                       COALESCE(SUM(CASE
                           WHEN t.type IN ('CREDIT', 'PIX_RECEIVED') THEN t.amount
                           WHEN t.type IN ('DEBIT', 'PIX_SENT') THEN -t.amount
                           ELSE 0
                       END), 0) AS expected
                FROM accounts a
                LEFT JOIN transactions t ON t.account_id = a.id
                GROUP BY a.id, a.balance
            ) totals
            WHERE balance <> expected
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let cards: Vec<(Uuid, Decimal, Decimal)> = sqlx::query_as(
            r#"
            SELECT id, available_limit, expected FROM (
                SELECT c.id, c.available_limit,
                       c.credit_limit - COALESCE(SUM(CASE
                           WHEN t.type = 'CARD_PURCHASE' THEN t.amount
                           WHEN t.type = 'CARD_PAYMENT' THEN -t.amount
                           ELSE 0
                       END), 0) AS expected
                FROM credit_cards c
                LEFT JOIN transactions t ON t.credit_card_id = c.id
                GROUP BY c.id, c.available_limit, c.credit_limit
            ) totals
            WHERE available_limit <> expected
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let accounts = accounts
            .into_iter()
            .map(|(id, recorded, expected)| LedgerDiscrepancy {
                entity: LedgerEntity::Account,
                id,
                recorded,
                expected,
            });
        let cards = cards
            .into_iter()
            .map(|(id, recorded, expected)| LedgerDiscrepancy {
                entity: LedgerEntity::CreditCard,
                id,
                recorded,
                expected,
            });

        Ok(accounts.chain(cards).collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }
}

// =========================================================================
// PgStoreTransaction
// =========================================================================

/// Open PostgreSQL transaction; rolled back by sqlx when dropped uncommitted
pub struct PgStoreTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn mark_event_processed(
        &mut self,
        event_id: Uuid,
        stream: Stream,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, stream)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(stream.name())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, type, number, status, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(account.id)
        .bind(account.account_type.as_str())
        .bind(&account.number)
        .bind(account.status.as_str())
        .bind(account.balance.value())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_account(&mut self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(account_from_row)
            .transpose()
    }

    async fn update_account_status(
        &mut self,
        id: Uuid,
        status: AccountStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE accounts SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_account_balance(
        &mut self,
        id: Uuid,
        balance: Balance,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE accounts SET balance = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(balance.value())
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn insert_credit_card(&mut self, card: &CreditCard) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO credit_cards (
                id, account_id, number, expiration_date, credit_limit,
                available_limit, statement_day, due_day, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(card.id)
        .bind(card.account_id)
        .bind(&card.number)
        .bind(card.expiration_date)
        .bind(card.credit_limit.value())
        .bind(card.available_limit.value())
        .bind(card.statement_day)
        .bind(card.due_day)
        .bind(card.created_at)
        .bind(card.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_credit_card(&mut self, id: Uuid) -> Result<Option<CreditCard>, StoreError> {
        let sql = format!(
            "SELECT {} FROM credit_cards WHERE id = $1 FOR UPDATE",
            CARD_COLUMNS
        );
        sqlx::query_as::<_, CardRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(card_from_row)
            .transpose()
    }

    async fn set_card_limits(
        &mut self,
        id: Uuid,
        credit_limit: Balance,
        available_limit: Balance,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE credit_cards
            SET credit_limit = $2, available_limit = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(credit_limit.value())
        .bind(available_limit.value())
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_pix_key(&mut self, key: &PixKey) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pix_keys (id, account_id, key_type, key, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(key.id)
        .bind(key.account_id)
        .bind(key.key_type.as_str())
        .bind(&key.key)
        .bind(key.status.as_str())
        .bind(key.created_at)
        .bind(key.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_pix_key(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pix_keys WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, account_id, type, amount, description,
                destination_key, credit_card_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.account_id)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.amount.value())
        .bind(&transaction.description)
        .bind(&transaction.destination_key)
        .bind(transaction.credit_card_id)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_rejection(
        &mut self,
        rejection: &TransactionRejection,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transaction_rejections (
                transaction_id, account_id, type, amount, reason, rejected_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(rejection.transaction_id)
        .bind(rejection.account_id)
        .bind(rejection.transaction_type.as_str())
        .bind(rejection.amount.value())
        .bind(rejection.reason.as_str())
        .bind(rejection.rejected_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
