//! Transaction events
//!
//! Re-checks every balance and limit rule against rows locked for the
//! duration of the unit of work. The gateway's checks ran against state that
//! may have moved since.

use crate::domain::{
    ledger_now, Account, AmountError, Balance, CreditCard, NotificationKind, RejectionReason, Transaction,
    TransactionRejection, TransactionType,
};
use crate::store::{StoreError, StoreTransaction};

use super::{Effect, Notice};

/// Ledger change a transaction resolves to
enum Delta {
    Balance(Balance),
    AvailableLimit { card: CreditCard, available: Balance },
}

pub(super) async fn apply(
    tx: &mut dyn StoreTransaction,
    transaction: &Transaction,
) -> Result<Effect, StoreError> {
    let Some(account) = tx.lock_account(transaction.account_id).await? else {
        return reject(tx, transaction, RejectionReason::AccountNotFound).await;
    };

    let delta = match resolve(tx, &account, transaction).await? {
        Ok(delta) => delta,
        Err(reason) => return reject(tx, transaction, reason).await,
    };

    let now = ledger_now();
    match delta {
        Delta::Balance(balance) => tx.set_account_balance(account.id, balance, now).await?,
        Delta::AvailableLimit { card, available } => {
            tx.set_card_limits(card.id, card.credit_limit, available, now)
                .await?
        }
    }
    tx.insert_transaction(transaction).await?;

    Ok(Effect::applied(Notice::new(
        transaction.account_id,
        NotificationKind::Transaction,
        format!(
            "{} of {} processed{}.",
            transaction.transaction_type,
            transaction.amount,
            describe_suffix(&transaction.description)
        ),
    )))
}

/// Work out the new balance or available limit, or why the transaction
/// cannot be applied
async fn resolve(
    tx: &mut dyn StoreTransaction,
    account: &Account,
    transaction: &Transaction,
) -> Result<Result<Delta, RejectionReason>, StoreError> {
    let amount = &transaction.amount;

    let outcome = match transaction.transaction_type {
        TransactionType::Credit | TransactionType::PixReceived => account
            .balance
            .credit(amount)
            .map(Delta::Balance)
            .map_err(|_| RejectionReason::BalanceOverflow),
        TransactionType::Debit | TransactionType::PixSent => {
            if !account.balance.is_sufficient_for(amount) {
                Err(RejectionReason::InsufficientFunds)
            } else {
                account
                    .balance
                    .debit(amount)
                    .map(Delta::Balance)
                    .map_err(|_| RejectionReason::InsufficientFunds)
            }
        }
        TransactionType::CardPurchase | TransactionType::CardPayment => {
            let card = match lock_owned_card(tx, account, transaction).await? {
                Ok(card) => card,
                Err(reason) => return Ok(Err(reason)),
            };
            card_delta(card, transaction)
        }
    };

    Ok(outcome)
}

async fn lock_owned_card(
    tx: &mut dyn StoreTransaction,
    account: &Account,
    transaction: &Transaction,
) -> Result<Result<CreditCard, RejectionReason>, StoreError> {
    let Some(card_id) = transaction.credit_card_id else {
        return Ok(Err(RejectionReason::CardReferenceRequired));
    };
    let Some(card) = tx.lock_credit_card(card_id).await? else {
        return Ok(Err(RejectionReason::CardNotFound));
    };
    if card.account_id != account.id {
        return Ok(Err(RejectionReason::CardAccountMismatch));
    }
    Ok(Ok(card))
}

/// Purchases consume the available limit; payments restore it, never beyond
/// the credit limit
fn card_delta(card: CreditCard, transaction: &Transaction) -> Result<Delta, RejectionReason> {
    let amount = &transaction.amount;

    let available = if transaction.transaction_type == TransactionType::CardPurchase {
        if !card.available_limit.is_sufficient_for(amount) {
            return Err(RejectionReason::InsufficientLimit);
        }
        card.available_limit
            .debit(amount)
            .map_err(|_| RejectionReason::InsufficientLimit)?
    } else {
        let restored = card
            .available_limit
            .credit(amount)
            .map_err(|_: AmountError| RejectionReason::LimitExceeded)?;
        if restored > card.credit_limit {
            return Err(RejectionReason::LimitExceeded);
        }
        restored
    };

    Ok(Delta::AvailableLimit { card, available })
}

async fn reject(
    tx: &mut dyn StoreTransaction,
    transaction: &Transaction,
    reason: RejectionReason,
) -> Result<Effect, StoreError> {
    tx.insert_rejection(&TransactionRejection::new(transaction, reason))
        .await?;

    // No account means nobody to notify
    let notice = (reason != RejectionReason::AccountNotFound).then(|| {
        Notice::new(
            transaction.account_id,
            NotificationKind::TransactionRejected,
            format!(
                "{} of {} was rejected: {}.",
                transaction.transaction_type,
                transaction.amount,
                reason.describe()
            ),
        )
    });

    Ok(Effect::rejected(reason.as_str(), notice))
}

fn describe_suffix(description: &str) -> String {
    if description.is_empty() {
        String::new()
    } else {
        format!(" ({})", description)
    }
}
