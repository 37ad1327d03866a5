//! Event Log Errors

use crate::domain::Stream;

/// Errors that can occur while talking to the event log
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    /// Another producer took the same offset first
    #[error("Offset conflict on stream {0}")]
    OffsetConflict(Stream),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Broker refused or dropped the request
    #[error("Event log unavailable: {0}")]
    Unavailable(String),

    /// None of the configured broker addresses accepted a connection
    #[error("No reachable broker in [{brokers}]: {last_error}")]
    NoBrokerReachable { brokers: String, last_error: String },
}

impl EventLogError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventLogError::OffsetConflict(_)
                | EventLogError::Database(_)
                | EventLogError::Unavailable(_)
        )
    }
}
