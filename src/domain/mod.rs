//! Domain module
//!
//! Core domain types and business rules.

pub mod amount;
pub mod context;
pub mod error;
pub mod events;
pub mod models;

pub use amount::{Amount, AmountError, Balance};
pub use context::OperationContext;
pub use error::DomainError;
pub use events::{EventEnvelope, EventPayload, Mutation, Operation, Stream};
pub use models::{
    ledger_now, Account, AccountStatus, AccountType, CreditCard, Notification, NotificationKind, PixKey,
    PixKeyStatus, PixKeyType, RejectionReason, Transaction, TransactionRejection,
    TransactionType, UnknownVariant,
};
