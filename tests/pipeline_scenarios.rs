//! End-to-end pipeline tests: gateway, event log, appliers and store wired
//! together in memory.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use digital_bank::applier::ApplyOutcome;
use digital_bank::domain::{
    AccountStatus, AccountType, Amount, DomainError, EventEnvelope, EventPayload,
    NotificationKind, OperationContext, RejectionReason, Stream, Transaction, TransactionType,
};
use digital_bank::event_log::EventLog;
use digital_bank::gateway::{
    CreateAccountCommand, GatewayError, TransactionCommand, UpdateAccountStatusCommand,
};
use digital_bank::store::LedgerStore;

mod common;

use common::Pipeline;

fn ctx() -> OperationContext {
    OperationContext::new().with_correlation_id(Uuid::new_v4())
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn scenario_credit_on_empty_account() {
    let p = Pipeline::new();
    let account = p.seed_account(dec!(0)).await;

    let cmd = TransactionCommand::new(account.id, TransactionType::Credit, "100.00");
    p.gateway.request_transaction(cmd, &ctx()).await.unwrap();

    assert_eq!(p.drain().await, vec![ApplyOutcome::Applied]);
    assert_eq!(p.balance(account.id).await, dec!(100));

    let history = p.store.list_transactions(account.id, 100).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount.value(), dec!(100));
    assert_eq!(p.sink.calls_of(NotificationKind::Transaction).len(), 1);
}

#[tokio::test]
async fn scenario_debit_over_balance_is_refused_synchronously() {
    let p = Pipeline::new();
    let account = p.seed_account(dec!(50)).await;

    let cmd = TransactionCommand::new(account.id, TransactionType::Debit, "100");
    let err = p.gateway.request_transaction(cmd, &ctx()).await.unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Domain(DomainError::InsufficientFunds { .. })
    ));
    assert_eq!(p.log.len(Stream::Transactions).await, 0);
    assert_eq!(p.balance(account.id).await, dec!(50));
}

/// Two debits accepted against the same stale balance. The requests are sent
/// one after the other; truly parallel applies run in integration_store.rs.
#[tokio::test]
async fn scenario_debits_accepted_on_stale_balance_only_one_commits() {
    let p = Pipeline::new();
    let account = p.seed_account(dec!(100)).await;

    // Both pass the gateway because neither has been applied yet
    for _ in 0..2 {
        let cmd = TransactionCommand::new(account.id, TransactionType::Debit, "60");
        p.gateway.request_transaction(cmd, &ctx()).await.unwrap();
    }
    assert_eq!(p.log.len(Stream::Transactions).await, 2);

    let outcomes = p.drain().await;
    assert_eq!(
        outcomes,
        vec![
            ApplyOutcome::Applied,
            ApplyOutcome::Rejected(RejectionReason::InsufficientFunds.as_str().to_string()),
        ]
    );
    assert_eq!(p.balance(account.id).await, dec!(40));
    assert_eq!(p.store.transaction_count().await, 1);

    let rejections = p.store.list_rejections(account.id).await.unwrap();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].reason, RejectionReason::InsufficientFunds);
    assert_eq!(p.sink.calls_of(NotificationKind::TransactionRejected).len(), 1);
}

#[tokio::test]
async fn scenario_card_purchase_over_available_limit() {
    let p = Pipeline::new();
    let account = p.seed_account(dec!(0)).await;
    let card = p.seed_card(&account, dec!(500), dec!(150)).await;

    let cmd =
        TransactionCommand::new(account.id, TransactionType::CardPurchase, "200").with_card(card.id);
    let err = p.gateway.request_transaction(cmd, &ctx()).await.unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Domain(DomainError::InsufficientLimit { .. })
    ));
    assert_eq!(p.log.len(Stream::Transactions).await, 0);
    assert_eq!(p.available_limit(card.id).await, dec!(150));
}

#[tokio::test]
async fn scenario_transient_commit_failure_is_redelivered_once() {
    let p = Pipeline::new();
    let account = p.seed_account(dec!(10)).await;

    let cmd = TransactionCommand::new(account.id, TransactionType::Credit, "5");
    p.gateway.request_transaction(cmd, &ctx()).await.unwrap();

    let worker = p.worker(Stream::Transactions);
    p.store.fail_next_commits(1);

    assert!(worker.step().await.is_err());
    assert_eq!(p.balance(account.id).await, dec!(10));
    assert_eq!(
        p.log
            .committed_offset(Stream::Transactions, "ledger-applier")
            .await,
        0
    );

    assert_eq!(worker.step().await.unwrap(), Some(ApplyOutcome::Applied));
    assert_eq!(worker.step().await.unwrap(), None);
    assert_eq!(p.balance(account.id).await, dec!(15));
    assert_eq!(p.store.transaction_count().await, 1);
}

// =========================================================================
// Idempotency and round trips
// =========================================================================

#[tokio::test]
async fn replayed_record_is_not_applied_twice() {
    let p = Pipeline::new();
    let account = p.seed_account(dec!(0)).await;

    let cmd = TransactionCommand::new(account.id, TransactionType::Credit, "30");
    p.gateway.request_transaction(cmd, &ctx()).await.unwrap();

    // The same bytes delivered again, as after a producer retry
    let record = p.log.records(Stream::Transactions).await.remove(0);
    p.log
        .append(Stream::Transactions, &record.key, &record.payload)
        .await
        .unwrap();

    assert_eq!(
        p.drain().await,
        vec![ApplyOutcome::Applied, ApplyOutcome::Duplicate]
    );
    assert_eq!(p.balance(account.id).await, dec!(30));
    assert_eq!(p.store.transaction_count().await, 1);
}

#[tokio::test]
async fn account_creation_round_trip_preserves_envelope_fields() {
    let p = Pipeline::new();
    let context = ctx();

    let accepted = p
        .gateway
        .request_account_creation(CreateAccountCommand::new(AccountType::Savings), &context)
        .await
        .unwrap();

    let record = p.log.records(Stream::Accounts).await.remove(0);
    let envelope: EventEnvelope = serde_json::from_slice(&record.payload).unwrap();
    assert_eq!(envelope.event_id, accepted.receipt.event_id);
    assert_eq!(envelope.correlation_id, context.correlation_id);
    assert_eq!(record.key, accepted.entity.id.to_string());

    assert_eq!(p.drain().await, vec![ApplyOutcome::Applied]);

    let stored = p
        .store
        .get_account(accepted.entity.id)
        .await
        .unwrap()
        .expect("account applied");
    assert_eq!(envelope.payload, EventPayload::Account(stored.clone()));
    assert_eq!(stored, accepted.entity);
    assert_eq!(p.sink.calls_of(NotificationKind::Welcome).len(), 1);
}

#[tokio::test]
async fn status_update_never_overwrites_balance() {
    let p = Pipeline::new();
    let account = p.seed_account(dec!(0)).await;

    // Status change accepted while the balance is still zero
    p.gateway
        .update_account_status(
            UpdateAccountStatusCommand::new(account.id, AccountStatus::Blocked),
            &ctx(),
        )
        .await
        .unwrap();
    let cmd = TransactionCommand::new(account.id, TransactionType::Credit, "70");
    p.gateway.request_transaction(cmd, &ctx()).await.unwrap();

    // Transactions applied first, then the stale account snapshot
    p.worker(Stream::Transactions).drain().await.unwrap();
    p.worker(Stream::Accounts).drain().await.unwrap();

    let stored = p.store.get_account(account.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AccountStatus::Blocked);
    assert_eq!(stored.balance.value(), dec!(70));
}

#[tokio::test]
async fn stored_notifications_are_listed_newest_first() {
    let p = Pipeline::with_stored_notifications();
    let accepted = p
        .gateway
        .request_account_creation(CreateAccountCommand::new(AccountType::Checking), &ctx())
        .await
        .unwrap();
    p.drain().await;

    let account_id = accepted.entity.id;
    let cmd = TransactionCommand::new(account_id, TransactionType::Credit, "12.50");
    p.gateway.request_transaction(cmd, &ctx()).await.unwrap();
    p.drain().await;

    let kinds: Vec<_> = p
        .store
        .list_notifications(account_id)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![NotificationKind::Transaction, NotificationKind::Welcome]
    );
}

// =========================================================================
// Properties
// =========================================================================

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn cents(value: i64) -> Decimal {
    Decimal::new(value, 2)
}

fn transaction(account_id: Uuid, kind: TransactionType, amount_cents: i64) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        account_id,
        transaction_type: kind,
        amount: Amount::new(cents(amount_cents)).unwrap(),
        description: String::new(),
        destination_key: None,
        credit_card_id: None,
        created_at: digital_bank::domain::ledger_now(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Applying DEBIT / PIX_SENT directly, without the gateway's advisory
    /// check, never drives a balance below zero
    #[test]
    fn outgoing_transfers_never_overdraw(
        start in 0i64..50_000,
        debits in prop::collection::vec((1i64..20_000, any::<bool>()), 1..12),
    ) {
        runtime().block_on(async {
            let p = Pipeline::new();
            let account = p.seed_account(cents(start)).await;
            let mut expected = cents(start);

            for (amount, pix) in debits {
                let kind = if pix { TransactionType::PixSent } else { TransactionType::Debit };
                let mut t = transaction(account.id, kind, amount);
                if pix {
                    t.destination_key = Some("someone@example.com".to_string());
                }
                let envelope = EventEnvelope::create(EventPayload::Transaction(t), &ctx());
                let outcome = p.applier.apply(&envelope).await.unwrap();

                if cents(amount) <= expected {
                    prop_assert_eq!(outcome, ApplyOutcome::Applied);
                    expected -= cents(amount);
                } else {
                    prop_assert_eq!(
                        outcome,
                        ApplyOutcome::Rejected(RejectionReason::InsufficientFunds.as_str().to_string())
                    );
                }

                let balance = p.balance(account.id).await;
                prop_assert!(balance >= Decimal::ZERO);
                prop_assert_eq!(balance, expected);
            }
            Ok(())
        })?;
    }

    /// CARD_PURCHASE keeps the available limit within [0, credit_limit]
    #[test]
    fn card_purchases_stay_within_limit(
        limit in 1i64..100_000,
        purchases in prop::collection::vec(1i64..30_000, 1..12),
    ) {
        runtime().block_on(async {
            let p = Pipeline::new();
            let account = p.seed_account(Decimal::ZERO).await;
            let card = p.seed_card(&account, cents(limit), cents(limit)).await;

            for amount in purchases {
                let mut t = transaction(account.id, TransactionType::CardPurchase, amount);
                t.credit_card_id = Some(card.id);
                let envelope = EventEnvelope::create(EventPayload::Transaction(t), &ctx());
                p.applier.apply(&envelope).await.unwrap();

                let available = p.available_limit(card.id).await;
                prop_assert!(available >= Decimal::ZERO);
                prop_assert!(available <= cents(limit));
            }

            // Purchases never touch the account balance
            prop_assert_eq!(p.balance(account.id).await, Decimal::ZERO);
            Ok(())
        })?;
    }
}
