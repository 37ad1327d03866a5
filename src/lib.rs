//! digital_bank Library
//!
//! Ledger synchronization pipeline for a digital bank: a validation gateway
//! publishes events to a durable log, and per-stream appliers write them to
//! the ledger store.

pub mod api;
pub mod applier;
pub mod domain;
pub mod event_log;
pub mod gateway;
pub mod jobs;
pub mod notifications;
pub mod producer;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use error::{AppError, AppResult, ErrorResponse};
pub use domain::{Amount, AmountError, Balance, DomainError, OperationContext};
pub use domain::{EventEnvelope, EventPayload, Operation, Stream};
