//! Event envelopes
//!
//! Mutation events carried by the event log. An envelope is never persisted
//! in the ledger tables; only its effects are.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::models::UnknownVariant;
use super::{Account, CreditCard, OperationContext, PixKey, Transaction};

/// One logical stream per entity kind. Order is only guaranteed within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Accounts,
    CreditCards,
    PixKeys,
    Transactions,
}

impl Stream {
    pub const ALL: [Stream; 4] = [
        Stream::Accounts,
        Stream::CreditCards,
        Stream::PixKeys,
        Stream::Transactions,
    ];

    /// Stream name as stored in the log
    pub fn name(&self) -> &'static str {
        match self {
            Stream::Accounts => "accounts",
            Stream::CreditCards => "credit_cards",
            Stream::PixKeys => "pix_keys",
            Stream::Transactions => "transactions",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stream {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stream::ALL
            .into_iter()
            .find(|stream| stream.name() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "stream",
                value: s.to_string(),
            })
    }
}

/// Kind of mutation an envelope asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

/// Entity carried by an envelope, tagged with its kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Account(Account),
    CreditCard(CreditCard),
    PixKey(PixKey),
    Transaction(Transaction),
}

impl EventPayload {
    /// The stream this payload belongs to
    pub fn stream(&self) -> Stream {
        match self {
            EventPayload::Account(_) => Stream::Accounts,
            EventPayload::CreditCard(_) => Stream::CreditCards,
            EventPayload::PixKey(_) => Stream::PixKeys,
            EventPayload::Transaction(_) => Stream::Transactions,
        }
    }

    /// Owning account, used as the record key
    pub fn account_id(&self) -> Uuid {
        match self {
            EventPayload::Account(account) => account.id,
            EventPayload::CreditCard(card) => card.account_id,
            EventPayload::PixKey(key) => key.account_id,
            EventPayload::Transaction(transaction) => transaction.account_id,
        }
    }

    /// The ledger change this payload makes under `operation`, or `None` when
    /// the entity kind does not accept the operation
    pub fn mutation(&self, operation: Operation) -> Option<Mutation<'_>> {
        match (self, operation) {
            (EventPayload::Account(a), Operation::Create) => Some(Mutation::OpenAccount(a)),
            (EventPayload::Account(a), Operation::Update) => Some(Mutation::SetAccountStatus(a)),
            (EventPayload::CreditCard(c), Operation::Create) => Some(Mutation::IssueCard(c)),
            (EventPayload::CreditCard(c), Operation::Update) => Some(Mutation::ChangeCardLimit(c)),
            (EventPayload::PixKey(k), Operation::Create) => Some(Mutation::RegisterPixKey(k)),
            (EventPayload::PixKey(k), Operation::Delete) => Some(Mutation::RemovePixKey(k)),
            (EventPayload::Transaction(t), Operation::Create) => {
                Some(Mutation::RecordTransaction(t))
            }
            _ => None,
        }
    }

    /// Whether the entity kind accepts this operation
    pub fn supports(&self, operation: Operation) -> bool {
        self.mutation(operation).is_some()
    }
}

/// Supported entity/operation pairs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mutation<'a> {
    OpenAccount(&'a Account),
    /// Status only; the balance belongs to the transactions stream
    SetAccountStatus(&'a Account),
    IssueCard(&'a CreditCard),
    ChangeCardLimit(&'a CreditCard),
    RegisterPixKey(&'a PixKey),
    RemovePixKey(&'a PixKey),
    RecordTransaction(&'a Transaction),
}

/// Tagged envelope appended to the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique per publish; the applier records it to make redelivery a no-op
    pub event_id: Uuid,
    pub operation: Operation,
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub published_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(operation: Operation, payload: EventPayload, context: &OperationContext) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            operation,
            payload,
            correlation_id: context.correlation_id,
            published_at: Utc::now(),
        }
    }

    pub fn create(payload: EventPayload, context: &OperationContext) -> Self {
        Self::new(Operation::Create, payload, context)
    }

    pub fn update(payload: EventPayload, context: &OperationContext) -> Self {
        Self::new(Operation::Update, payload, context)
    }

    pub fn delete(payload: EventPayload, context: &OperationContext) -> Self {
        Self::new(Operation::Delete, payload, context)
    }

    pub fn stream(&self) -> Stream {
        self.payload.stream()
    }

    pub fn mutation(&self) -> Option<Mutation<'_>> {
        self.payload.mutation(self.operation)
    }
}
