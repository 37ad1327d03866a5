//! API Routes
//!
//! HTTP endpoint definitions. Writes are answered with `202 Accepted` once the
//! gateway has published the event; the entity becomes visible to reads after
//! the applier commits it.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, AccountType, CreditCard, DomainError, Notification, OperationContext,
    PixKey, PixKeyType, Transaction, TransactionType,
};
use crate::error::AppError;
use crate::gateway::{
    ChangeCardLimitCommand, CreateAccountCommand, CreateCardCommand, RegisterPixKeyCommand,
    TransactionCommand, UpdateAccountStatusCommand, ValidationGateway,
};
use crate::producer::PublishReceipt;
use crate::store::{LedgerStore, DEFAULT_TRANSACTION_PAGE};

/// Status reported for every accepted write
const PENDING: &str = "pending";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub gateway: ValidationGateway,
    pub store: Arc<dyn LedgerStore>,
}

impl AppState {
    pub fn new(gateway: ValidationGateway, store: Arc<dyn LedgerStore>) -> Self {
        Self { gateway, store }
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    #[serde(rename = "type")]
    pub account_type: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCardRequest {
    pub account_id: Uuid,
    pub limit: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeCardLimitRequest {
    pub limit: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPixKeyRequest {
    pub account_id: Uuid,
    pub key_type: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionRequest {
    pub account_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub amount: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub destination_key: Option<String>,
    #[serde(default)]
    pub credit_card_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Publish metadata attached to every accepted write
#[derive(Debug, Serialize)]
pub struct EventReceipt {
    pub event_id: Uuid,
    pub stream: String,
    pub offset: i64,
}

impl From<PublishReceipt> for EventReceipt {
    fn from(receipt: PublishReceipt) -> Self {
        Self {
            event_id: receipt.event_id,
            stream: receipt.stream.to_string(),
            offset: receipt.offset,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub number: String,
    pub status: AccountStatus,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            account_type: a.account_type,
            number: a.number,
            status: a.status,
            balance: a.balance.value(),
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountAcceptedResponse {
    pub account_id: Uuid,
    pub number: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub account_status: AccountStatus,
    pub status: &'static str,
    pub event: EventReceipt,
}

#[derive(Debug, Serialize)]
pub struct CardAcceptedResponse {
    pub card_id: Uuid,
    pub account_id: Uuid,
    pub last_digits: String,
    pub credit_limit: Decimal,
    pub available_limit: Decimal,
    pub expiration_date: DateTime<Utc>,
    pub status: &'static str,
    pub event: EventReceipt,
}

#[derive(Debug, Serialize)]
pub struct PixKeyAcceptedResponse {
    pub pix_key_id: Uuid,
    pub account_id: Uuid,
    pub key_type: PixKeyType,
    pub key: String,
    pub status: &'static str,
    pub event: EventReceipt,
}

#[derive(Debug, Serialize)]
pub struct TransactionAcceptedResponse {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_card_id: Option<Uuid>,
    pub status: &'static str,
    pub event: EventReceipt,
}

#[derive(Debug, Serialize)]
pub struct TransactionEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_card_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionEntry {
    fn from(t: Transaction) -> Self {
        Self {
            id: t.id,
            transaction_type: t.transaction_type,
            amount: t.amount.value(),
            description: t.description,
            destination_key: t.destination_key,
            credit_card_id: t.credit_card_id,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub account_id: Uuid,
    pub transactions: Vec<TransactionEntry>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub account_id: Uuid,
    pub notifications: Vec<Notification>,
}

type Accepted<T> = (StatusCode, Json<T>);

fn accepted<T>(body: T) -> Accepted<T> {
    (StatusCode::ACCEPTED, Json(body))
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:account_id", get(get_account))
        .route("/accounts/:account_id/status", patch(update_account_status))
        .route("/accounts/:account_id/transactions", get(list_transactions))
        .route("/accounts/:account_id/notifications", get(list_notifications))
        .route("/credit-cards", post(create_credit_card))
        .route("/credit-cards/:card_id/limit", patch(change_card_limit))
        .route("/pix-keys", post(register_pix_key))
        .route("/pix-keys/:pix_key_id", delete(remove_pix_key))
        .route("/transactions", post(create_transaction))
}

// =========================================================================
// Accounts
// =========================================================================

async fn create_account(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<Accepted<AccountAcceptedResponse>, AppError> {
    let account_type: AccountType = request.account_type.parse().map_err(DomainError::from)?;

    let result = state
        .gateway
        .request_account_creation(CreateAccountCommand::new(account_type), &context)
        .await?;

    Ok(accepted(account_accepted(result.entity, result.receipt)))
}

async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = require_account(&state, account_id).await?;
    Ok(Json(account.into()))
}

async fn update_account_status(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(account_id): Path<Uuid>,
    Json(request): Json<UpdateAccountStatusRequest>,
) -> Result<Accepted<AccountAcceptedResponse>, AppError> {
    let status: AccountStatus = request.status.parse().map_err(DomainError::from)?;

    let result = state
        .gateway
        .update_account_status(UpdateAccountStatusCommand::new(account_id, status), &context)
        .await?;

    Ok(accepted(account_accepted(result.entity, result.receipt)))
}

fn account_accepted(account: Account, receipt: PublishReceipt) -> AccountAcceptedResponse {
    AccountAcceptedResponse {
        account_id: account.id,
        number: account.number,
        account_type: account.account_type,
        account_status: account.status,
        status: PENDING,
        event: receipt.into(),
    }
}

async fn list_transactions(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<TransactionsResponse>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TRANSACTION_PAGE)
        .clamp(1, DEFAULT_TRANSACTION_PAGE);

    require_account(&state, account_id).await?;
    let transactions = state.store.list_transactions(account_id, limit).await?;

    Ok(Json(TransactionsResponse {
        account_id,
        transactions: transactions.into_iter().map(Into::into).collect(),
    }))
}

async fn list_notifications(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> Result<Json<NotificationsResponse>, AppError> {
    require_account(&state, account_id).await?;
    let notifications = state.store.list_notifications(account_id).await?;

    Ok(Json(NotificationsResponse {
        account_id,
        notifications,
    }))
}

// =========================================================================
// Credit cards
// =========================================================================

async fn create_credit_card(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateCardRequest>,
) -> Result<Accepted<CardAcceptedResponse>, AppError> {
    let result = state
        .gateway
        .request_card_creation(
            CreateCardCommand::new(request.account_id, request.limit),
            &context,
        )
        .await?;

    Ok(accepted(card_accepted(result.entity, result.receipt)))
}

async fn change_card_limit(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(card_id): Path<Uuid>,
    Json(request): Json<ChangeCardLimitRequest>,
) -> Result<Accepted<CardAcceptedResponse>, AppError> {
    let result = state
        .gateway
        .request_card_limit_change(ChangeCardLimitCommand::new(card_id, request.limit), &context)
        .await?;

    Ok(accepted(card_accepted(result.entity, result.receipt)))
}

fn card_accepted(card: CreditCard, receipt: PublishReceipt) -> CardAcceptedResponse {
    // The full card number is never echoed back
    CardAcceptedResponse {
        card_id: card.id,
        account_id: card.account_id,
        last_digits: card.last_digits().to_string(),
        credit_limit: card.credit_limit.value(),
        available_limit: card.available_limit.value(),
        expiration_date: card.expiration_date,
        status: PENDING,
        event: receipt.into(),
    }
}

// =========================================================================
// PIX keys
// =========================================================================

async fn register_pix_key(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<RegisterPixKeyRequest>,
) -> Result<Accepted<PixKeyAcceptedResponse>, AppError> {
    let key_type: PixKeyType = request.key_type.parse().map_err(DomainError::from)?;
    let command = RegisterPixKeyCommand {
        account_id: request.account_id,
        key_type,
        key: request.key,
    };

    let result = state
        .gateway
        .request_pix_key_registration(command, &context)
        .await?;

    Ok(accepted(pix_key_accepted(result.entity, result.receipt)))
}

async fn remove_pix_key(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(pix_key_id): Path<Uuid>,
) -> Result<Accepted<PixKeyAcceptedResponse>, AppError> {
    let result = state
        .gateway
        .request_pix_key_removal(pix_key_id, &context)
        .await?;

    Ok(accepted(pix_key_accepted(result.entity, result.receipt)))
}

fn pix_key_accepted(pix_key: PixKey, receipt: PublishReceipt) -> PixKeyAcceptedResponse {
    PixKeyAcceptedResponse {
        pix_key_id: pix_key.id,
        account_id: pix_key.account_id,
        key_type: pix_key.key_type,
        key: pix_key.key,
        status: PENDING,
        event: receipt.into(),
    }
}

// =========================================================================
// Transactions
// =========================================================================

async fn create_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<TransactionRequest>,
) -> Result<Accepted<TransactionAcceptedResponse>, AppError> {
    let transaction_type: TransactionType =
        request.transaction_type.parse().map_err(DomainError::from)?;

    let command = TransactionCommand {
        account_id: request.account_id,
        transaction_type,
        amount: request.amount,
        description: request.description,
        destination_key: request.destination_key,
        credit_card_id: request.credit_card_id,
    };

    let result = state.gateway.request_transaction(command, &context).await?;
    let transaction = result.entity;

    Ok(accepted(TransactionAcceptedResponse {
        transaction_id: transaction.id,
        account_id: transaction.account_id,
        transaction_type: transaction.transaction_type,
        amount: transaction.amount.value(),
        credit_card_id: transaction.credit_card_id,
        status: PENDING,
        event: result.receipt.into(),
    }))
}

// =========================================================================
// Helpers
// =========================================================================

async fn require_account(state: &AppState, account_id: Uuid) -> Result<Account, AppError> {
    state
        .store
        .get_account(account_id)
        .await?
        .ok_or_else(|| DomainError::AccountNotFound(account_id).into())
}
