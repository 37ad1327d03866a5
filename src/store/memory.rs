//! In-memory ledger store
//!
//! Same semantics as the PostgreSQL store, held behind a single async mutex.
//! A transaction owns the lock for its whole lifetime and stages its writes on
//! a copy of the state, so an uncommitted transaction leaves nothing behind.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, Balance, CreditCard, Notification, PixKey, Stream, Transaction,
    TransactionRejection, TransactionType,
};

use super::{LedgerDiscrepancy, LedgerEntity, LedgerStore, StoreError, StoreTransaction};

/// TIMESTAMPTZ keeps microseconds; stored timestamps are cut the same way
fn stored(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: HashMap<Uuid, Account>,
    credit_cards: HashMap<Uuid, CreditCard>,
    pix_keys: HashMap<Uuid, PixKey>,
    transactions: Vec<Transaction>,
    rejections: Vec<TransactionRejection>,
    notifications: Vec<Notification>,
    processed_events: HashSet<Uuid>,
}

/// Ledger store kept in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<LedgerState>>,
    failing_commits: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with [`StoreError::Unavailable`]
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Insert an account directly, bypassing the pipeline
    pub async fn seed_account(&self, account: Account) {
        self.state.lock().await.accounts.insert(account.id, account);
    }

    /// Insert a credit card directly, bypassing the pipeline
    pub async fn seed_credit_card(&self, card: CreditCard) {
        self.state.lock().await.credit_cards.insert(card.id, card);
    }

    /// Number of recorded transactions across all accounts
    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn get_credit_card(&self, id: Uuid) -> Result<Option<CreditCard>, StoreError> {
        Ok(self.state.lock().await.credit_cards.get(&id).cloned())
    }

    async fn get_pix_key(&self, id: Uuid) -> Result<Option<PixKey>, StoreError> {
        Ok(self.state.lock().await.pix_keys.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().await;
        let mut transactions: Vec<Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        transactions.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(transactions)
    }

    async fn list_rejections(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<TransactionRejection>, StoreError> {
        let state = self.state.lock().await;
        let mut rejections: Vec<TransactionRejection> = state
            .rejections
            .iter()
            .rev()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        rejections.sort_by(|a, b| b.rejected_at.cmp(&a.rejected_at));
        Ok(rejections)
    }

    async fn list_notifications(&self, account_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.lock().await;
        let mut notifications: Vec<Notification> = state
            .notifications
            .iter()
            .rev()
            .filter(|n| n.account_id == account_id)
            .cloned()
            .collect();
        // Stable sort over reversed insertion order keeps ties newest first
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut notification = notification.clone();
        notification.created_at = stored(notification.created_at);
        self.state.lock().await.notifications.push(notification);
        Ok(())
    }

    async fn delete_notifications_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.notifications.len();
        state.notifications.retain(|n| n.created_at >= cutoff);
        Ok((before - state.notifications.len()) as u64)
    }

    async fn ledger_discrepancies(&self) -> Result<Vec<LedgerDiscrepancy>, StoreError> {
        let state = self.state.lock().await;
        let mut discrepancies = Vec::new();

        for account in state.accounts.values() {
            let expected = state
                .transactions
                .iter()
                .filter(|t| t.account_id == account.id)
                .fold(rust_decimal::Decimal::ZERO, |sum, t| {
                    if t.transaction_type.credits_balance() {
                        sum + t.amount.value()
                    } else if t.transaction_type.debits_balance() {
                        sum - t.amount.value()
                    } else {
                        sum
                    }
                });
            if account.balance.value() != expected {
                discrepancies.push(LedgerDiscrepancy {
                    entity: LedgerEntity::Account,
                    id: account.id,
                    recorded: account.balance.value(),
                    expected,
                });
            }
        }

        for card in state.credit_cards.values() {
            let expected = state
                .transactions
                .iter()
                .filter(|t| t.credit_card_id == Some(card.id))
                .fold(card.credit_limit.value(), |sum, t| match t.transaction_type {
                    TransactionType::CardPurchase => sum - t.amount.value(),
                    TransactionType::CardPayment => sum + t.amount.value(),
                    _ => sum,
                });
            if card.available_limit.value() != expected {
                discrepancies.push(LedgerDiscrepancy {
                    entity: LedgerEntity::CreditCard,
                    id: card.id,
                    recorded: card.available_limit.value(),
                    expected,
                });
            }
        }

        Ok(discrepancies)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            staged,
            store: self.clone(),
        }))
    }
}

/// Holds the store lock until committed or dropped
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
    store: MemoryStore,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn mark_event_processed(
        &mut self,
        event_id: Uuid,
        _stream: Stream,
    ) -> Result<bool, StoreError> {
        Ok(self.staged.processed_events.insert(event_id))
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        if self.staged.accounts.contains_key(&account.id) {
            return Err(StoreError::UniqueViolation("accounts_pkey".into()));
        }
        if self
            .staged
            .accounts
            .values()
            .any(|a| a.number == account.number)
        {
            return Err(StoreError::UniqueViolation("accounts_number_key".into()));
        }
        let mut account = account.clone();
        account.created_at = stored(account.created_at);
        account.updated_at = stored(account.updated_at);
        self.staged.accounts.insert(account.id, account);
        Ok(())
    }

    async fn lock_account(&mut self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.staged.accounts.get(&id).cloned())
    }

    async fn update_account_status(
        &mut self,
        id: Uuid,
        status: AccountStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.staged.accounts.get_mut(&id) {
            Some(account) => {
                account.status = status;
                account.updated_at = stored(updated_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_account_balance(
        &mut self,
        id: Uuid,
        balance: Balance,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(account) = self.staged.accounts.get_mut(&id) {
            account.balance = balance;
            account.updated_at = stored(updated_at);
        }
        Ok(())
    }

    async fn insert_credit_card(&mut self, card: &CreditCard) -> Result<(), StoreError> {
        if self.staged.credit_cards.contains_key(&card.id) {
            return Err(StoreError::UniqueViolation("credit_cards_pkey".into()));
        }
        if self
            .staged
            .credit_cards
            .values()
            .any(|c| c.number == card.number)
        {
            return Err(StoreError::UniqueViolation(
                "credit_cards_number_key".into(),
            ));
        }
        if !self.staged.accounts.contains_key(&card.account_id) {
            return Err(StoreError::Unavailable(format!(
                "foreign key violation: account {} does not exist",
                card.account_id
            )));
        }
        let mut card = card.clone();
        card.expiration_date = stored(card.expiration_date);
        card.created_at = stored(card.created_at);
        card.updated_at = stored(card.updated_at);
        self.staged.credit_cards.insert(card.id, card);
        Ok(())
    }

    async fn lock_credit_card(&mut self, id: Uuid) -> Result<Option<CreditCard>, StoreError> {
        Ok(self.staged.credit_cards.get(&id).cloned())
    }

    async fn set_card_limits(
        &mut self,
        id: Uuid,
        credit_limit: Balance,
        available_limit: Balance,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(card) = self.staged.credit_cards.get_mut(&id) {
            card.credit_limit = credit_limit;
            card.available_limit = available_limit;
            card.updated_at = stored(updated_at);
        }
        Ok(())
    }

    async fn insert_pix_key(&mut self, key: &PixKey) -> Result<(), StoreError> {
        if self.staged.pix_keys.contains_key(&key.id) {
            return Err(StoreError::UniqueViolation("pix_keys_pkey".into()));
        }
        if self.staged.pix_keys.values().any(|k| k.key == key.key) {
            return Err(StoreError::UniqueViolation("pix_keys_key_key".into()));
        }
        let mut key = key.clone();
        key.created_at = stored(key.created_at);
        key.updated_at = stored(key.updated_at);
        self.staged.pix_keys.insert(key.id, key);
        Ok(())
    }

    async fn delete_pix_key(&mut self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.staged.pix_keys.remove(&id).is_some())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        if self.staged.transactions.iter().any(|t| t.id == transaction.id) {
            return Err(StoreError::UniqueViolation("transactions_pkey".into()));
        }
        let mut transaction = transaction.clone();
        transaction.created_at = stored(transaction.created_at);
        self.staged.transactions.push(transaction);
        Ok(())
    }

    async fn insert_rejection(
        &mut self,
        rejection: &TransactionRejection,
    ) -> Result<(), StoreError> {
        if !self
            .staged
            .rejections
            .iter()
            .any(|r| r.transaction_id == rejection.transaction_id)
        {
            let mut rejection = rejection.clone();
            rejection.rejected_at = stored(rejection.rejected_at);
            self.staged.rejections.push(rejection);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            mut guard,
            staged,
            store,
        } = *self;

        if store.take_injected_failure() {
            return Err(StoreError::Unavailable("commit failed".into()));
        }

        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountType, Amount};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_uncommitted_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let account = Account::open(AccountType::Checking);

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_account(&account).await.unwrap();
        }

        assert!(store.get_account(account.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let account = Account::open(AccountType::Savings);

        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_account(account.id).await.unwrap(), Some(account));
    }

    #[tokio::test]
    async fn test_injected_commit_failure_rolls_back() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let account = Account::open(AccountType::Checking);

        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.get_account(account.id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.get_account(account.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unique_account_number() {
        let store = MemoryStore::new();
        let first = Account::open(AccountType::Checking);
        let mut second = Account::open(AccountType::Checking);
        second.number = first.number.clone();

        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&first).await.unwrap();
        let err = tx.insert_account(&second).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_processed_events_are_recorded_once() {
        let store = MemoryStore::new();
        let event_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        assert!(tx
            .mark_event_processed(event_id, Stream::Transactions)
            .await
            .unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(!tx
            .mark_event_processed(event_id, Stream::Transactions)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_discrepancy_detection() {
        let store = MemoryStore::new();
        let mut account = Account::open(AccountType::Checking);
        account.balance = Balance::new(dec!(10)).unwrap();
        store.seed_account(account.clone()).await;

        let card = CreditCard::issue(account.id, Amount::new(dec!(500)).unwrap());
        store.seed_credit_card(card).await;

        let discrepancies = store.ledger_discrepancies().await.unwrap();
        assert_eq!(discrepancies.len(), 1);
        assert_eq!(discrepancies[0].entity, LedgerEntity::Account);
        assert_eq!(discrepancies[0].recorded, dec!(10));
        assert_eq!(discrepancies[0].expected, dec!(0));
    }

    #[tokio::test]
    async fn test_notification_retention() {
        let store = MemoryStore::new();
        let account_id = Uuid::new_v4();
        let mut old = Notification::new(account_id, crate::domain::NotificationKind::Welcome, "hi");
        old.created_at = Utc::now() - chrono::Duration::days(40);
        let fresh = Notification::new(
            account_id,
            crate::domain::NotificationKind::StatusChange,
            "blocked",
        );
        store.insert_notification(&old).await.unwrap();
        store.insert_notification(&fresh).await.unwrap();

        let deleted = store
            .delete_notifications_before(Utc::now() - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.list_notifications(account_id).await.unwrap(), vec![fresh]);
    }

    #[tokio::test]
    async fn test_timestamps_are_kept_at_microsecond_precision() {
        let store = MemoryStore::new();
        let mut account = Account::open(AccountType::Checking);
        let precise = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        account.created_at = precise;
        account.updated_at = precise;

        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.created_at.timestamp_subsec_nanos(), 123_456_000);
        assert_eq!(stored.updated_at, stored.created_at);
    }
}
