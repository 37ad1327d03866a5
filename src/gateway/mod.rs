//! Validation Gateway
//!
//! Synchronous entry point for every mutation. Reads current state from the
//! store, rejects requests that cannot succeed, and publishes exactly one event
//! for each request it accepts. It never waits for the applier, so its checks
//! are advisory: the applier re-validates under a row lock.

mod commands;
mod pix;


use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    ledger_now, Account, Amount, CreditCard, DomainError, EventEnvelope, EventPayload, OperationContext,
    PixKey, Transaction, TransactionType,
};
use crate::producer::{EventProducer, PublishError, PublishReceipt};
use crate::store::{LedgerStore, StoreError};

pub use commands::{
    Accepted, ChangeCardLimitCommand, CreateAccountCommand, CreateCardCommand,
    RegisterPixKeyCommand, TransactionCommand, UpdateAccountStatusCommand,
};
pub use pix::normalize_pix_key;

/// Why a request was not accepted
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Clone)]
pub struct ValidationGateway {
    store: Arc<dyn LedgerStore>,
    producer: EventProducer,
}

impl ValidationGateway {
    pub fn new(store: Arc<dyn LedgerStore>, producer: EventProducer) -> Self {
        Self { store, producer }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    pub async fn request_account_creation(
        &self,
        command: CreateAccountCommand,
        context: &OperationContext,
    ) -> Result<Accepted<Account>, GatewayError> {
        let account = Account::open(command.account_type);
        let receipt = self
            .publish(EventEnvelope::create(
                EventPayload::Account(account.clone()),
                context,
            ))
            .await?;

        tracing::info!(account_id = %account.id, "Account creation accepted");
        Ok(Accepted {
            entity: account,
            receipt,
        })
    }

    pub async fn update_account_status(
        &self,
        command: UpdateAccountStatusCommand,
        context: &OperationContext,
    ) -> Result<Accepted<Account>, GatewayError> {
        let account = self.require_account(command.account_id).await?;
        let updated = account.with_status(command.status);
        let receipt = self
            .publish(EventEnvelope::update(
                EventPayload::Account(updated.clone()),
                context,
            ))
            .await?;

        tracing::info!(
            account_id = %updated.id,
            status = %updated.status,
            "Account status change accepted"
        );
        Ok(Accepted {
            entity: updated,
            receipt,
        })
    }

    // =========================================================================
    // Credit cards
    // =========================================================================

    pub async fn request_card_creation(
        &self,
        command: CreateCardCommand,
        context: &OperationContext,
    ) -> Result<Accepted<CreditCard>, GatewayError> {
        let limit: Amount = command.limit.parse().map_err(DomainError::from)?;
        self.require_account(command.account_id).await?;

        let card = CreditCard::issue(command.account_id, limit);
        let receipt = self
            .publish(EventEnvelope::create(
                EventPayload::CreditCard(card.clone()),
                context,
            ))
            .await?;

        tracing::info!(card_id = %card.id, account_id = %card.account_id, "Card creation accepted");
        Ok(Accepted {
            entity: card,
            receipt,
        })
    }

    pub async fn request_card_limit_change(
        &self,
        command: ChangeCardLimitCommand,
        context: &OperationContext,
    ) -> Result<Accepted<CreditCard>, GatewayError> {
        let limit: Amount = command.limit.parse().map_err(DomainError::from)?;
        let card = self.require_card(command.card_id).await?;

        let outstanding = card.outstanding();
        if limit.value() < outstanding {
            return Err(DomainError::LimitBelowOutstanding {
                requested: limit.value(),
                outstanding,
            }
            .into());
        }

        let updated = card.with_credit_limit(limit);
        let receipt = self
            .publish(EventEnvelope::update(
                EventPayload::CreditCard(updated.clone()),
                context,
            ))
            .await?;

        tracing::info!(card_id = %updated.id, limit = %limit, "Card limit change accepted");
        Ok(Accepted {
            entity: updated,
            receipt,
        })
    }

    // =========================================================================
    // PIX keys
    // =========================================================================

    pub async fn request_pix_key_registration(
        &self,
        command: RegisterPixKeyCommand,
        context: &OperationContext,
    ) -> Result<Accepted<PixKey>, GatewayError> {
        let key = normalize_pix_key(command.key_type, command.key.as_deref())?;
        self.require_account(command.account_id).await?;

        let pix_key = PixKey::register(command.account_id, command.key_type, key);
        let receipt = self
            .publish(EventEnvelope::create(
                EventPayload::PixKey(pix_key.clone()),
                context,
            ))
            .await?;

        tracing::info!(
            pix_key_id = %pix_key.id,
            account_id = %pix_key.account_id,
            key_type = %pix_key.key_type,
            "PIX key registration accepted"
        );
        Ok(Accepted {
            entity: pix_key,
            receipt,
        })
    }

    pub async fn request_pix_key_removal(
        &self,
        pix_key_id: Uuid,
        context: &OperationContext,
    ) -> Result<Accepted<PixKey>, GatewayError> {
        let pix_key = self
            .store
            .get_pix_key(pix_key_id)
            .await?
            .ok_or(DomainError::PixKeyNotFound(pix_key_id))?;

        let receipt = self
            .publish(EventEnvelope::delete(
                EventPayload::PixKey(pix_key.clone()),
                context,
            ))
            .await?;

        tracing::info!(pix_key_id = %pix_key.id, "PIX key removal accepted");
        Ok(Accepted {
            entity: pix_key,
            receipt,
        })
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Validate and enqueue a transaction. The returned transaction is pending
    /// until the applier commits it.
    pub async fn request_transaction(
        &self,
        command: TransactionCommand,
        context: &OperationContext,
    ) -> Result<Accepted<Transaction>, GatewayError> {
        let amount: Amount = command.amount.parse().map_err(DomainError::from)?;
        let transaction_type = command.transaction_type;

        let destination_key = command
            .destination_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        if transaction_type == TransactionType::PixSent && destination_key.is_none() {
            return Err(DomainError::DestinationKeyRequired.into());
        }

        let account = self.require_account(command.account_id).await?;

        let card = if transaction_type.requires_card() {
            let card_id = command
                .credit_card_id
                .ok_or(DomainError::CardReferenceRequired(transaction_type.as_str()))?;
            let card = self.require_card(card_id).await?;
            if card.account_id != account.id {
                return Err(DomainError::CardAccountMismatch {
                    card_id,
                    account_id: account.id,
                }
                .into());
            }
            Some(card)
        } else {
            None
        };

        match transaction_type {
            TransactionType::Debit | TransactionType::PixSent => {
                if !account.balance.is_sufficient_for(&amount) {
                    return Err(DomainError::insufficient_funds(
                        amount.value(),
                        account.balance.value(),
                    )
                    .into());
                }
            }
            TransactionType::CardPurchase => {
                if let Some(card) = &card {
                    if !card.available_limit.is_sufficient_for(&amount) {
                        return Err(DomainError::insufficient_limit(
                            amount.value(),
                            card.available_limit.value(),
                        )
                        .into());
                    }
                }
            }
            TransactionType::Credit
            | TransactionType::PixReceived
            | TransactionType::CardPayment => {}
        }

        let transaction = Transaction {
            id: Uuid::new_v4(),
            account_id: account.id,
            transaction_type,
            amount,
            description: command.description.unwrap_or_default(),
            destination_key,
            credit_card_id: card.map(|c| c.id),
            created_at: ledger_now(),
        };

        let receipt = self
            .publish(EventEnvelope::create(
                EventPayload::Transaction(transaction.clone()),
                context,
            ))
            .await?;

        tracing::info!(
            transaction_id = %transaction.id,
            account_id = %transaction.account_id,
            transaction_type = %transaction.transaction_type,
            amount = %transaction.amount,
            "Transaction accepted for processing"
        );
        Ok(Accepted {
            entity: transaction,
            receipt,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn require_account(&self, account_id: Uuid) -> Result<Account, GatewayError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| DomainError::AccountNotFound(account_id).into())
    }

    async fn require_card(&self, card_id: Uuid) -> Result<CreditCard, GatewayError> {
        self.store
            .get_credit_card(card_id)
            .await?
            .ok_or_else(|| DomainError::CardNotFound(card_id).into())
    }

    async fn publish(&self, envelope: EventEnvelope) -> Result<PublishReceipt, GatewayError> {
        self.producer.publish(&envelope).await.map_err(|e| {
            tracing::error!(
                event_id = %envelope.event_id,
                stream = %envelope.stream(),
                error = %e,
                "Publish failed, request not accepted"
            );
            GatewayError::Publish(e)
        })
    }
}
