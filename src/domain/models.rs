//! Ledger entities
//!
//! Accounts, credit cards, PIX keys and transactions as they are carried in
//! event envelopes and stored in the ledger tables.

use chrono::{DateTime, Months, SubsecRound, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Amount, Balance};

/// Current time at the precision the ledger tables keep (microseconds), so a
/// timestamp reads back from the store exactly as it was published
pub fn ledger_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Error returned when a stored or requested enum value is unknown
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// wire name is also its database representation.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// =========================================================================
// Account
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Checking,
    Savings,
}

string_enum!(AccountType, "account type", {
    Checking => "CHECKING",
    Savings => "SAVINGS",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    #[default]
    Active,
    Blocked,
}

string_enum!(AccountStatus, "account status", {
    Active => "ACTIVE",
    Blocked => "BLOCKED",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub number: String,
    pub status: AccountStatus,
    pub balance: Balance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Open a new, empty account with a freshly generated number
    pub fn open(account_type: AccountType) -> Self {
        let now = ledger_now();
        Self {
            id: Uuid::new_v4(),
            account_type,
            number: generate_digits(10),
            status: AccountStatus::Active,
            balance: Balance::zero(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this account carrying a new status
    pub fn with_status(&self, status: AccountStatus) -> Self {
        Self {
            status,
            updated_at: ledger_now(),
            ..self.clone()
        }
    }
}

// =========================================================================
// Credit card
// =========================================================================

/// Card number prefix (issuer identification)
const CARD_NUMBER_PREFIX: &str = "4532";

const DEFAULT_STATEMENT_DAY: i32 = 5;
const DEFAULT_DUE_DAY: i32 = 15;
const CARD_VALIDITY_MONTHS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCard {
    pub id: Uuid,
    pub account_id: Uuid,
    pub number: String,
    pub expiration_date: DateTime<Utc>,
    pub credit_limit: Balance,
    pub available_limit: Balance,
    pub statement_day: i32,
    pub due_day: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditCard {
    /// Issue a new card for an account with its whole limit available
    pub fn issue(account_id: Uuid, limit: Amount) -> Self {
        let now = ledger_now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            number: format!("{}{}", CARD_NUMBER_PREFIX, generate_digits(12)),
            expiration_date: now
                .checked_add_months(Months::new(CARD_VALIDITY_MONTHS))
                .unwrap_or(now),
            credit_limit: limit.into(),
            available_limit: limit.into(),
            statement_day: DEFAULT_STATEMENT_DAY,
            due_day: DEFAULT_DUE_DAY,
            created_at: now,
            updated_at: now,
        }
    }

    /// Portion of the credit line currently in use
    pub fn outstanding(&self) -> Decimal {
        self.credit_limit.value() - self.available_limit.value()
    }

    /// Last four digits, safe to show in messages and responses
    pub fn last_digits(&self) -> &str {
        let number = self.number.as_str();
        number.get(number.len().saturating_sub(4)..).unwrap_or(number)
    }

    /// Copy of this card carrying a new credit limit
    pub fn with_credit_limit(&self, limit: Amount) -> Self {
        Self {
            credit_limit: limit.into(),
            updated_at: ledger_now(),
            ..self.clone()
        }
    }
}

// =========================================================================
// PIX key
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixKeyType {
    /// Individual tax id (11 digits)
    Cpf,
    Email,
    Phone,
    Random,
}

string_enum!(PixKeyType, "PIX key type", {
    Cpf => "CPF",
    Email => "EMAIL",
    Phone => "PHONE",
    Random => "RANDOM",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixKeyStatus {
    #[default]
    Active,
    Inactive,
}

string_enum!(PixKeyStatus, "PIX key status", {
    Active => "ACTIVE",
    Inactive => "INACTIVE",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixKey {
    pub id: Uuid,
    pub account_id: Uuid,
    pub key_type: PixKeyType,
    pub key: String,
    pub status: PixKeyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PixKey {
    pub fn register(account_id: Uuid, key_type: PixKeyType, key: String) -> Self {
        let now = ledger_now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            key_type,
            key,
            status: PixKeyStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

// =========================================================================
// Transaction
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Debit,
    Credit,
    PixSent,
    PixReceived,
    CardPurchase,
    CardPayment,
}

string_enum!(TransactionType, "transaction type", {
    Debit => "DEBIT",
    Credit => "CREDIT",
    PixSent => "PIX_SENT",
    PixReceived => "PIX_RECEIVED",
    CardPurchase => "CARD_PURCHASE",
    CardPayment => "CARD_PAYMENT",
});

impl TransactionType {
    /// Whether this type moves money out of the account balance
    pub fn debits_balance(&self) -> bool {
        matches!(self, TransactionType::Debit | TransactionType::PixSent)
    }

    /// Whether this type moves money into the account balance
    pub fn credits_balance(&self) -> bool {
        matches!(self, TransactionType::Credit | TransactionType::PixReceived)
    }

    /// Whether this type acts on a credit card's available limit
    pub fn requires_card(&self) -> bool {
        matches!(
            self,
            TransactionType::CardPurchase | TransactionType::CardPayment
        )
    }
}

/// Immutable audit record of one ledger effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Amount,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_card_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Why the applier refused a transaction that had passed the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    InsufficientFunds,
    InsufficientLimit,
    LimitExceeded,
    AccountNotFound,
    CardNotFound,
    CardReferenceRequired,
    CardAccountMismatch,
    BalanceOverflow,
}

string_enum!(RejectionReason, "rejection reason", {
    InsufficientFunds => "INSUFFICIENT_FUNDS",
    InsufficientLimit => "INSUFFICIENT_LIMIT",
    LimitExceeded => "LIMIT_EXCEEDED",
    AccountNotFound => "ACCOUNT_NOT_FOUND",
    CardNotFound => "CARD_NOT_FOUND",
    CardReferenceRequired => "CARD_REFERENCE_REQUIRED",
    CardAccountMismatch => "CARD_ACCOUNT_MISMATCH",
    BalanceOverflow => "BALANCE_OVERFLOW",
});

impl RejectionReason {
    /// Message shown to the account holder
    pub fn describe(&self) -> &'static str {
        match self {
            RejectionReason::InsufficientFunds => "insufficient funds",
            RejectionReason::InsufficientLimit => "insufficient credit limit",
            RejectionReason::LimitExceeded => "payment exceeds the card's used limit",
            RejectionReason::AccountNotFound => "account not found",
            RejectionReason::CardNotFound => "credit card not found",
            RejectionReason::CardReferenceRequired => "credit card reference is required",
            RejectionReason::CardAccountMismatch => "credit card belongs to another account",
            RejectionReason::BalanceOverflow => "balance would exceed the maximum allowed",
        }
    }
}

/// Terminal record for a transaction refused at apply time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRejection {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Amount,
    pub reason: RejectionReason,
    pub rejected_at: DateTime<Utc>,
}

impl TransactionRejection {
    pub fn new(transaction: &Transaction, reason: RejectionReason) -> Self {
        Self {
            transaction_id: transaction.id,
            account_id: transaction.account_id,
            transaction_type: transaction.transaction_type,
            amount: transaction.amount,
            reason,
            rejected_at: ledger_now(),
        }
    }
}

// =========================================================================
// Notification
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Welcome,
    StatusChange,
    CardCreated,
    CardLimitChange,
    PixKeyRegistered,
    PixKeyRemoved,
    Transaction,
    TransactionRejected,
    RequestRejected,
}

string_enum!(NotificationKind, "notification kind", {
    Welcome => "WELCOME",
    StatusChange => "STATUS_CHANGE",
    CardCreated => "CARD_CREATED",
    CardLimitChange => "CARD_LIMIT_CHANGE",
    PixKeyRegistered => "PIX_KEY_REGISTERED",
    PixKeyRemoved => "PIX_KEY_REMOVED",
    Transaction => "TRANSACTION",
    TransactionRejected => "TRANSACTION_REJECTED",
    RequestRejected => "REQUEST_REJECTED",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(account_id: Uuid, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            kind,
            message: message.into(),
            read: false,
            created_at: ledger_now(),
        }
    }
}

/// Random decimal digit string of the given length (first digit non-zero)
fn generate_digits(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|i| {
            let digit = if i == 0 {
                rng.gen_range(1..=9)
            } else {
                rng.gen_range(0..=9)
            };
            char::from(b'0' + digit)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_open_defaults() {
        let account = Account::open(AccountType::Checking);
        assert_eq!(account.number.len(), 10);
        assert!(account.number.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.balance, Balance::zero());
    }

    #[test]
    fn test_generated_timestamps_fit_store_precision() {
        let account = Account::open(AccountType::Savings);
        let card = CreditCard::issue(account.id, Amount::new(dec!(100)).unwrap());
        let key = PixKey::register(account.id, PixKeyType::Random, Uuid::new_v4().to_string());

        for at in [
            account.created_at,
            card.created_at,
            card.expiration_date,
            key.updated_at,
            ledger_now(),
        ] {
            assert_eq!(at.timestamp_subsec_nanos() % 1_000, 0);
        }
    }

    #[test]
    fn test_credit_card_issue() {
        let limit = Amount::new(dec!(1500)).unwrap();
        let card = CreditCard::issue(Uuid::new_v4(), limit);

        assert_eq!(card.number.len(), 16);
        assert!(card.number.starts_with("4532"));
        assert_eq!(card.credit_limit.value(), dec!(1500));
        assert_eq!(card.available_limit, card.credit_limit);
        assert_eq!(card.outstanding(), Decimal::ZERO);
        assert_eq!(card.statement_day, 5);
        assert_eq!(card.due_day, 15);
        assert!(card.expiration_date > card.created_at);
        assert_eq!(card.last_digits(), &card.number[12..]);
    }

    #[test]
    fn test_transaction_type_wire_names() {
        let json = serde_json::to_string(&TransactionType::PixSent).unwrap();
        assert_eq!(json, r#""PIX_SENT""#);
        let json = serde_json::to_string(&TransactionType::CardPurchase).unwrap();
        assert_eq!(json, r#""CARD_PURCHASE""#);

        for t in [
            TransactionType::Debit,
            TransactionType::Credit,
            TransactionType::PixSent,
            TransactionType::PixReceived,
            TransactionType::CardPurchase,
            TransactionType::CardPayment,
        ] {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json.trim_matches('"'), t.as_str());
            assert_eq!(t.as_str().parse::<TransactionType>().unwrap(), t);
        }
    }

    #[test]
    fn test_transaction_type_classification() {
        assert!(TransactionType::Debit.debits_balance());
        assert!(TransactionType::PixSent.debits_balance());
        assert!(TransactionType::PixReceived.credits_balance());
        assert!(!TransactionType::CardPayment.credits_balance());
        assert!(TransactionType::CardPayment.requires_card());
        assert!(!TransactionType::Credit.requires_card());
    }

    #[test]
    fn test_unknown_variant() {
        let err = "FROZEN".parse::<AccountStatus>().unwrap_err();
        assert_eq!(err.kind, "account status");
        assert!(err.to_string().contains("FROZEN"));
    }

    #[test]
    fn test_account_json_shape() {
        let account = Account::open(AccountType::Savings);
        let value = serde_json::to_value(&account).unwrap();
        assert_eq!(value["type"], "SAVINGS");
        assert_eq!(value["status"], "ACTIVE");
    }
}
