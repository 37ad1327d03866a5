//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::{AmountError, UnknownVariant};

/// Business rule violations detected by the validation gateway.
///
/// These never reach the event log: a request failing any of them is
/// answered synchronously and nothing is published.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Amount is zero, negative, badly scaled or out of range
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    /// Account balance does not cover a debit
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Card available limit does not cover a purchase
    #[error("Insufficient limit: required {required}, available {available}")]
    InsufficientLimit { required: Decimal, available: Decimal },

    /// New credit limit is below what is already spent on the card
    #[error("Credit limit {requested} is below the outstanding amount {outstanding}")]
    LimitBelowOutstanding { requested: Decimal, outstanding: Decimal },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Credit card not found: {0}")]
    CardNotFound(Uuid),

    #[error("PIX key not found: {0}")]
    PixKeyNotFound(Uuid),

    /// Card transactions must reference a card
    #[error("Credit card reference is required for {0} transactions")]
    CardReferenceRequired(&'static str),

    /// PIX transfers must name where the money goes
    #[error("Destination key is required for PIX transfers")]
    DestinationKeyRequired,

    #[error("Credit card {card_id} does not belong to account {account_id}")]
    CardAccountMismatch { card_id: Uuid, account_id: Uuid },

    #[error("Invalid PIX key: {0}")]
    InvalidPixKey(String),

    #[error(transparent)]
    UnknownVariant(#[from] UnknownVariant),
}

impl DomainError {
    pub fn insufficient_funds(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    pub fn insufficient_limit(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientLimit {
            required,
            available,
        }
    }

    /// Malformed input (400-class)
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::CardReferenceRequired(_)
                | Self::DestinationKeyRequired
                | Self::CardAccountMismatch { .. }
                | Self::InvalidPixKey(_)
                | Self::UnknownVariant(_)
        )
    }

    /// Referenced entity is missing (404-class)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound(_) | Self::CardNotFound(_) | Self::PixKeyNotFound(_)
        )
    }
}
