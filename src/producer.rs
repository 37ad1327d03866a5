//! Event Producer
//!
//! Serializes envelopes and appends them to their stream, retrying transient
//! log failures. A publish returns only after the log acknowledged the record.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{EventEnvelope, Stream};
use crate::event_log::{EventLog, EventLogError};

/// Producer retry policy
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Retries after the first attempt (default: 5)
    pub max_retries: u32,
    /// Base delay, multiplied by the attempt number (default: 100ms)
    pub retry_backoff: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Acknowledged publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub event_id: Uuid,
    pub stream: Stream,
    pub offset: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{operation} is not supported for {stream} events")]
    UnsupportedOperation { operation: String, stream: Stream },

    #[error("Event not acknowledged after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: EventLogError,
    },

    #[error("Event log rejected the event: {0}")]
    Rejected(EventLogError),
}

/// Publishes envelopes to the event log
#[derive(Clone)]
pub struct EventProducer {
    log: Arc<dyn EventLog>,
    config: ProducerConfig,
}

impl EventProducer {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self::with_config(log, ProducerConfig::default())
    }

    pub fn with_config(log: Arc<dyn EventLog>, config: ProducerConfig) -> Self {
        Self { log, config }
    }

    /// Publish an envelope to the stream of its payload
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<PublishReceipt, PublishError> {
        let stream = envelope.stream();
        if !envelope.payload.supports(envelope.operation) {
            return Err(PublishError::UnsupportedOperation {
                operation: envelope.operation.to_string(),
                stream,
            });
        }

        let payload = serde_json::to_vec(envelope)?;
        let key = envelope.payload.account_id().to_string();
        let attempts = self.config.max_retries + 1;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.log.append(stream, &key, &payload).await {
                Ok(offset) => {
                    tracing::debug!(
                        stream = %stream,
                        offset,
                        event_id = %envelope.event_id,
                        operation = %envelope.operation,
                        "Event published"
                    );
                    return Ok(PublishReceipt {
                        event_id: envelope.event_id,
                        stream,
                        offset,
                    });
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        stream = %stream,
                        event_id = %envelope.event_id,
                        error = %e,
                        "Publish failed, retrying (attempt {}/{})",
                        attempt,
                        attempts
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::error!(
                        stream = %stream,
                        event_id = %envelope.event_id,
                        error = %e,
                        "Publish retries exhausted"
                    );
                    return Err(PublishError::Exhausted {
                        attempts,
                        last_error: e,
                    });
                }
                Err(e) => return Err(PublishError::Rejected(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, AccountType, EventPayload, OperationContext, Operation};
    use crate::event_log::MemoryEventLog;

    fn fast_config() -> ProducerConfig {
        ProducerConfig {
            max_retries: 5,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn account_envelope() -> EventEnvelope {
        EventEnvelope::create(
            EventPayload::Account(Account::open(AccountType::Checking)),
            &OperationContext::new(),
        )
    }

    #[tokio::test]
    async fn test_publish_appends_to_payload_stream() {
        let log = Arc::new(MemoryEventLog::new());
        let producer = EventProducer::with_config(log.clone(), fast_config());
        let envelope = account_envelope();

        let receipt = producer.publish(&envelope).await.unwrap();
        assert_eq!(receipt.stream, Stream::Accounts);
        assert_eq!(receipt.offset, 1);
        assert_eq!(receipt.event_id, envelope.event_id);

        let records = log.records(Stream::Accounts).await;
        let decoded: EventEnvelope = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(records[0].key, envelope.payload.account_id().to_string());
    }

    #[tokio::test]
    async fn test_publish_retries_transient_failures() {
        let log = Arc::new(MemoryEventLog::new());
        log.fail_next_appends(5);
        let producer = EventProducer::with_config(log.clone(), fast_config());

        let receipt = producer.publish(&account_envelope()).await.unwrap();
        assert_eq!(receipt.offset, 1);
        assert_eq!(log.len(Stream::Accounts).await, 1);
    }

    #[tokio::test]
    async fn test_publish_gives_up_after_max_retries() {
        let log = Arc::new(MemoryEventLog::new());
        log.fail_next_appends(6);
        let producer = EventProducer::with_config(log.clone(), fast_config());

        let err = producer.publish(&account_envelope()).await.unwrap_err();
        assert!(matches!(err, PublishError::Exhausted { attempts: 6, .. }));
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_not_published() {
        let log = Arc::new(MemoryEventLog::new());
        let producer = EventProducer::with_config(log.clone(), fast_config());
        let mut envelope = account_envelope();
        envelope.operation = Operation::Delete;

        let err = producer.publish(&envelope).await.unwrap_err();
        assert!(matches!(err, PublishError::UnsupportedOperation { .. }));
        assert!(log.is_empty().await);
    }
}
