//! Ledger Store
//!
//! Durable state for accounts, credit cards, PIX keys and transactions, and the
//! single source of truth for balances and limits.
//!
//! Reads go through [`LedgerStore`]. Every mutation made by an applier runs
//! inside one [`StoreTransaction`]; dropping a transaction without committing
//! it discards all of its writes.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, Balance, CreditCard, Notification, PixKey, Stream, Transaction,
    TransactionRejection,
};

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Default page size for transaction listings
pub const DEFAULT_TRANSACTION_PAGE: i64 = 100;

/// A balance or available limit that disagrees with the transaction history
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerDiscrepancy {
    pub entity: LedgerEntity,
    pub id: Uuid,
    pub recorded: Decimal,
    pub expected: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEntity {
    Account,
    CreditCard,
}

impl std::fmt::Display for LedgerEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerEntity::Account => write!(f, "account"),
            LedgerEntity::CreditCard => write!(f, "credit_card"),
        }
    }
}

/// Read side of the store plus the entry point for atomic units of work
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn get_credit_card(&self, id: Uuid) -> Result<Option<CreditCard>, StoreError>;

    async fn get_pix_key(&self, id: Uuid) -> Result<Option<PixKey>, StoreError>;

    /// Newest first
    async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Newest first
    async fn list_rejections(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<TransactionRejection>, StoreError>;

    /// Newest first
    async fn list_notifications(&self, account_id: Uuid) -> Result<Vec<Notification>, StoreError>;

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Returns the number of notifications deleted
    async fn delete_notifications_before(&self, cutoff: DateTime<Utc>)
        -> Result<u64, StoreError>;

    /// Accounts and cards whose stored value disagrees with their transactions
    async fn ledger_discrepancies(&self) -> Result<Vec<LedgerDiscrepancy>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One atomic unit of work against the store
#[async_trait]
pub trait StoreTransaction: Send {
    /// Record that an event has been applied. Returns `false` when the event id
    /// was already recorded, in which case the caller must not apply it again.
    async fn mark_event_processed(&mut self, event_id: Uuid, stream: Stream)
        -> Result<bool, StoreError>;

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError>;

    /// Read an account and hold it until commit (`SELECT ... FOR UPDATE`)
    async fn lock_account(&mut self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Returns `false` if the account does not exist
    async fn update_account_status(
        &mut self,
        id: Uuid,
        status: AccountStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn set_account_balance(
        &mut self,
        id: Uuid,
        balance: Balance,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_credit_card(&mut self, card: &CreditCard) -> Result<(), StoreError>;

    /// Read a card and hold it until commit (`SELECT ... FOR UPDATE`)
    async fn lock_credit_card(&mut self, id: Uuid) -> Result<Option<CreditCard>, StoreError>;

    async fn set_card_limits(
        &mut self,
        id: Uuid,
        credit_limit: Balance,
        available_limit: Balance,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_pix_key(&mut self, key: &PixKey) -> Result<(), StoreError>;

    /// Returns `false` if there was no such key
    async fn delete_pix_key(&mut self, id: Uuid) -> Result<bool, StoreError>;

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn insert_rejection(&mut self, rejection: &TransactionRejection)
        -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
