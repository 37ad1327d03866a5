//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::gateway::GatewayError;
use crate::producer::PublishError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource already exists: {0}")]
    Conflict(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Event could not be published")]
    Publish(#[from] PublishError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation(constraint) => AppError::Conflict(constraint),
            other => AppError::Store(other),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Domain(e) => e.into(),
            GatewayError::Store(e) => e.into(),
            GatewayError::Publish(e) => e.into(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Domain(e) => domain_status(e),
            AppError::Publish(_) => (StatusCode::SERVICE_UNAVAILABLE, "publish_failed"),
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
        }
    }
}

fn domain_status(e: &DomainError) -> (StatusCode, &'static str) {
    match e {
        DomainError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount"),
        DomainError::InvalidPixKey(_) => (StatusCode::BAD_REQUEST, "invalid_pix_key"),
        DomainError::CardReferenceRequired(_) => {
            (StatusCode::BAD_REQUEST, "card_reference_required")
        }
        DomainError::DestinationKeyRequired => {
            (StatusCode::BAD_REQUEST, "destination_key_required")
        }
        DomainError::CardAccountMismatch { .. } => {
            (StatusCode::BAD_REQUEST, "card_account_mismatch")
        }
        DomainError::UnknownVariant(_) => (StatusCode::BAD_REQUEST, "invalid_value"),

        DomainError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "account_not_found"),
        DomainError::CardNotFound(_) => (StatusCode::NOT_FOUND, "card_not_found"),
        DomainError::PixKeyNotFound(_) => (StatusCode::NOT_FOUND, "pix_key_not_found"),

        DomainError::InsufficientFunds { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_funds")
        }
        DomainError::InsufficientLimit { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_limit")
        }
        DomainError::LimitBelowOutstanding { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "limit_below_outstanding")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        let details = match &self {
            AppError::InvalidRequest(msg) | AppError::Conflict(msg) => Some(msg.clone()),
            AppError::Domain(e) => Some(e.to_string()),
            AppError::Publish(e) => {
                tracing::error!("Publish error: {}", e);
                None
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                None
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                None
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                None
            }
        };

        let error = match &self {
            // Infrastructure detail stays in the log
            AppError::Store(_) => "Store error".to_string(),
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AmountError;
    use crate::event_log::EventLogError;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn status_of(e: impl Into<AppError>) -> StatusCode {
        e.into().into_response().status()
    }

    #[test]
    fn test_validation_errors_are_bad_request() {
        assert_eq!(
            status_of(DomainError::InvalidAmount(AmountError::NotPositive(dec!(0)))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DomainError::DestinationKeyRequired),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_missing_entities_are_not_found() {
        assert_eq!(
            status_of(DomainError::AccountNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(GatewayError::Domain(DomainError::CardNotFound(Uuid::new_v4()))),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_business_rule_violations_are_unprocessable() {
        assert_eq!(
            status_of(DomainError::insufficient_funds(dec!(100), dec!(50))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(DomainError::insufficient_limit(dec!(200), dec!(150))),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        let e = StoreError::UniqueViolation("accounts_number_key".into());
        assert_eq!(status_of(e), StatusCode::CONFLICT);
    }

    #[test]
    fn test_publish_failure_is_service_unavailable() {
        let e = GatewayError::Publish(PublishError::Exhausted {
            attempts: 6,
            last_error: EventLogError::Unavailable("broker down".into()),
        });
        assert_eq!(status_of(e), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_store_failure_is_internal() {
        let e = StoreError::Unavailable("connection reset".into());
        assert_eq!(status_of(e), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
