//! Command definitions
//!
//! Requests accepted by the validation gateway. Money travels as a string and
//! is parsed into an [`Amount`](crate::domain::Amount) by the gateway.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AccountStatus, AccountType, PixKeyType, TransactionType};
use crate::producer::PublishReceipt;

/// Open a new account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    pub account_type: AccountType,
}

impl CreateAccountCommand {
    pub fn new(account_type: AccountType) -> Self {
        Self { account_type }
    }
}

/// Issue a credit card for an existing account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCardCommand {
    pub account_id: Uuid,
    pub limit: String,
}

impl CreateCardCommand {
    pub fn new(account_id: Uuid, limit: impl Into<String>) -> Self {
        Self {
            account_id,
            limit: limit.into(),
        }
    }
}

/// Change the credit limit of an existing card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeCardLimitCommand {
    pub card_id: Uuid,
    pub limit: String,
}

impl ChangeCardLimitCommand {
    pub fn new(card_id: Uuid, limit: impl Into<String>) -> Self {
        Self {
            card_id,
            limit: limit.into(),
        }
    }
}

/// Register a PIX key. `key` may be omitted for RANDOM keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPixKeyCommand {
    pub account_id: Uuid,
    pub key_type: PixKeyType,
    pub key: Option<String>,
}

impl RegisterPixKeyCommand {
    pub fn new(account_id: Uuid, key_type: PixKeyType, key: impl Into<String>) -> Self {
        Self {
            account_id,
            key_type,
            key: Some(key.into()),
        }
    }

    pub fn random(account_id: Uuid) -> Self {
        Self {
            account_id,
            key_type: PixKeyType::Random,
            key: None,
        }
    }
}

/// Move money in or out of an account or card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionCommand {
    pub account_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: String,
    pub description: Option<String>,
    pub destination_key: Option<String>,
    pub credit_card_id: Option<Uuid>,
}

impl TransactionCommand {
    pub fn new(account_id: Uuid, transaction_type: TransactionType, amount: impl Into<String>) -> Self {
        Self {
            account_id,
            transaction_type,
            amount: amount.into(),
            description: None,
            destination_key: None,
            credit_card_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_destination_key(mut self, key: impl Into<String>) -> Self {
        self.destination_key = Some(key.into());
        self
    }

    pub fn with_card(mut self, card_id: Uuid) -> Self {
        self.credit_card_id = Some(card_id);
        self
    }
}

/// Block or reactivate an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAccountStatusCommand {
    pub account_id: Uuid,
    pub status: AccountStatus,
}

impl UpdateAccountStatusCommand {
    pub fn new(account_id: Uuid, status: AccountStatus) -> Self {
        Self { account_id, status }
    }
}

/// A request that passed validation and was published. The entity is what
/// the applier will write once it processes the event.
#[derive(Debug, Clone)]
pub struct Accepted<T> {
    pub entity: T,
    pub receipt: PublishReceipt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_command_builder() {
        let account_id = Uuid::new_v4();
        let card_id = Uuid::new_v4();
        let cmd = TransactionCommand::new(account_id, TransactionType::CardPurchase, "25.00")
            .with_description("coffee")
            .with_card(card_id);

        assert_eq!(cmd.account_id, account_id);
        assert_eq!(cmd.amount, "25.00");
        assert_eq!(cmd.description.as_deref(), Some("coffee"));
        assert_eq!(cmd.credit_card_id, Some(card_id));
        assert!(cmd.destination_key.is_none());
    }

    #[test]
    fn test_random_pix_key_command_has_no_key() {
        let cmd = RegisterPixKeyCommand::random(Uuid::new_v4());
        assert_eq!(cmd.key_type, PixKeyType::Random);
        assert!(cmd.key.is_none());
    }
}
