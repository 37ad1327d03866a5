//! Notifications
//!
//! Account-holder notifications emitted by the appliers after a commit. A
//! failed notification never undoes the ledger change it reports on.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::domain::{Notification, NotificationKind};
use crate::store::{LedgerStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to store notification: {0}")]
    Store(#[from] StoreError),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Destination for account-holder notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        account_id: Uuid,
        kind: NotificationKind,
        message: &str,
    ) -> Result<(), NotifyError>;
}

/// Writes notifications to the `notifications` table
#[derive(Clone)]
pub struct StoreNotificationSink {
    store: Arc<dyn LedgerStore>,
}

impl StoreNotificationSink {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationSink for StoreNotificationSink {
    async fn notify(
        &self,
        account_id: Uuid,
        kind: NotificationKind,
        message: &str,
    ) -> Result<(), NotifyError> {
        let notification = Notification::new(account_id, kind, message);
        self.store.insert_notification(&notification).await?;
        tracing::debug!(account_id = %account_id, kind = %kind, "Notification stored");
        Ok(())
    }
}

/// Recorded notification
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyCall {
    pub account_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
}

/// Fake sink that records every call and can be told to fail
#[derive(Clone, Default)]
pub struct FakeNotificationSink {
    calls: Arc<Mutex<Vec<NotifyCall>>>,
    failing: Arc<AtomicBool>,
}

impl FakeNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded notifications
    pub fn calls(&self) -> Vec<NotifyCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded notifications of one kind
    pub fn calls_of(&self, kind: NotificationKind) -> Vec<NotifyCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.kind == kind)
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationSink for FakeNotificationSink {
    async fn notify(
        &self,
        account_id: Uuid,
        kind: NotificationKind,
        message: &str,
    ) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("sink unavailable".into()));
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(NotifyCall {
                account_id,
                kind,
                message: message.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_store_sink_persists_notification() {
        let store = Arc::new(MemoryStore::new());
        let sink = StoreNotificationSink::new(store.clone());
        let account_id = Uuid::new_v4();

        sink.notify(account_id, NotificationKind::Welcome, "Welcome!")
            .await
            .unwrap();

        let stored = store.list_notifications(account_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, NotificationKind::Welcome);
        assert_eq!(stored[0].message, "Welcome!");
        assert!(!stored[0].read);
    }

    #[tokio::test]
    async fn test_fake_sink_records_and_fails_on_demand() {
        let sink = FakeNotificationSink::new();
        let account_id = Uuid::new_v4();

        sink.notify(account_id, NotificationKind::Transaction, "debit")
            .await
            .unwrap();
        sink.set_failing(true);
        assert!(sink
            .notify(account_id, NotificationKind::Transaction, "debit")
            .await
            .is_err());

        assert_eq!(sink.calls_of(NotificationKind::Transaction).len(), 1);
    }
}
