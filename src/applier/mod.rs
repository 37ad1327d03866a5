//! Event Applier
//!
//! One worker per stream reads events in offset order and applies each one to
//! the store in a single atomic unit together with its `processed_events`
//! marker. The log cursor only advances after that unit has committed, so a
//! store failure leads to redelivery and the marker turns the redelivery into
//! a no-op.
//!
//! Business-rule violations found at apply time are terminal: the event is
//! acknowledged, the rejection is recorded and the account holder is notified.

mod account;
mod card;
mod pix_key;
mod transaction;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::{EventEnvelope, EventPayload, Mutation, NotificationKind, Stream};
use crate::event_log::{EventLog, EventLogError, LogRecord};
use crate::notifications::NotificationSink;
use crate::store::{LedgerStore, StoreError, StoreTransaction};

/// Result of processing one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Mutation committed
    Applied,
    /// Event acknowledged without effect on balances or entities
    Rejected(String),
    /// Event id was already processed
    Duplicate,
    /// Event could not be interpreted and was skipped
    Skipped(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("Store error while applying event: {0}")]
    Store(#[from] StoreError),

    #[error("Event log error: {0}")]
    Log(#[from] EventLogError),
}

/// Message to deliver once the unit of work has committed
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Notice {
    pub account_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
}

impl Notice {
    pub fn new(account_id: Uuid, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            account_id,
            kind,
            message: message.into(),
        }
    }
}

/// What a handler decided, plus what to tell the account holder
#[derive(Debug)]
pub(crate) struct Effect {
    pub outcome: ApplyOutcome,
    pub notices: Vec<Notice>,
}

impl Effect {
    pub fn applied(notice: Notice) -> Self {
        Self {
            outcome: ApplyOutcome::Applied,
            notices: vec![notice],
        }
    }

    pub fn rejected(reason: impl Into<String>, notice: Option<Notice>) -> Self {
        Self {
            outcome: ApplyOutcome::Rejected(reason.into()),
            notices: notice.into_iter().collect(),
        }
    }
}

// =========================================================================
// Applier
// =========================================================================

/// Applies decoded envelopes to the store
#[derive(Clone)]
pub struct Applier {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl Applier {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { store, notifier }
    }

    /// Decode a log record and apply it. Undecodable records and records that
    /// do not belong on their stream are skipped.
    pub async fn apply_record(&self, record: &LogRecord) -> Result<ApplyOutcome, StoreError> {
        let envelope: EventEnvelope = match serde_json::from_slice(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    stream = %record.stream,
                    offset = record.offset,
                    error = %e,
                    "Undecodable event skipped"
                );
                return Ok(ApplyOutcome::Skipped(format!("undecodable payload: {}", e)));
            }
        };

        if envelope.stream() != record.stream {
            tracing::error!(
                stream = %record.stream,
                offset = record.offset,
                event_id = %envelope.event_id,
                payload_stream = %envelope.stream(),
                "Event on the wrong stream skipped"
            );
            return Ok(ApplyOutcome::Skipped(format!(
                "{} event on {} stream",
                envelope.stream(),
                record.stream
            )));
        }

        self.apply(&envelope).await
    }

    /// Apply one envelope atomically
    pub async fn apply(&self, envelope: &EventEnvelope) -> Result<ApplyOutcome, StoreError> {
        let stream = envelope.stream();
        let Some(mutation) = envelope.mutation() else {
            tracing::error!(
                stream = %stream,
                event_id = %envelope.event_id,
                operation = %envelope.operation,
                "Unsupported operation skipped"
            );
            return Ok(ApplyOutcome::Skipped(format!(
                "{} is not supported on {}",
                envelope.operation, stream
            )));
        };

        let mut tx = self.store.begin().await?;
        if !tx.mark_event_processed(envelope.event_id, stream).await? {
            tracing::debug!(stream = %stream, event_id = %envelope.event_id, "Duplicate event ignored");
            return Ok(ApplyOutcome::Duplicate);
        }

        let effect = match dispatch(tx.as_mut(), mutation).await {
            Ok(effect) => effect,
            Err(StoreError::UniqueViolation(constraint)) => {
                drop(tx);
                return self.reject_conflict(envelope, constraint).await;
            }
            Err(e) => return Err(e),
        };

        tx.commit().await?;

        match &effect.outcome {
            ApplyOutcome::Rejected(reason) => tracing::warn!(
                stream = %stream,
                event_id = %envelope.event_id,
                account_id = %envelope.payload.account_id(),
                reason = %reason,
                "Event rejected at apply time"
            ),
            _ => tracing::debug!(
                stream = %stream,
                event_id = %envelope.event_id,
                operation = %envelope.operation,
                "Event applied"
            ),
        }

        self.deliver(effect.notices).await;
        Ok(effect.outcome)
    }

    /// A CREATE collided with a uniqueness constraint. The failed unit is gone,
    /// so the event is marked processed in a fresh one and acknowledged.
    async fn reject_conflict(
        &self,
        envelope: &EventEnvelope,
        constraint: String,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.store.begin().await?;
        if !tx
            .mark_event_processed(envelope.event_id, envelope.stream())
            .await?
        {
            return Ok(ApplyOutcome::Duplicate);
        }
        tx.commit().await?;

        tracing::warn!(
            stream = %envelope.stream(),
            event_id = %envelope.event_id,
            constraint = %constraint,
            "Event rejected on unique constraint"
        );

        let reason = format!("conflicts with an existing record ({})", constraint);
        self.deliver(vec![Notice::new(
            envelope.payload.account_id(),
            NotificationKind::RequestRejected,
            format!("Your {} request was rejected: {}", entity_label(&envelope.payload), reason),
        )])
        .await;

        Ok(ApplyOutcome::Rejected(reason))
    }

    async fn deliver(&self, notices: Vec<Notice>) {
        for notice in notices {
            if let Err(e) = self
                .notifier
                .notify(notice.account_id, notice.kind, &notice.message)
                .await
            {
                tracing::warn!(
                    account_id = %notice.account_id,
                    kind = %notice.kind,
                    error = %e,
                    "Notification failed"
                );
            }
        }
    }
}

async fn dispatch(
    tx: &mut dyn StoreTransaction,
    mutation: Mutation<'_>,
) -> Result<Effect, StoreError> {
    match mutation {
        Mutation::OpenAccount(a) => account::open(tx, a).await,
        Mutation::SetAccountStatus(a) => account::set_status(tx, a).await,
        Mutation::IssueCard(c) => card::issue(tx, c).await,
        Mutation::ChangeCardLimit(c) => card::change_limit(tx, c).await,
        Mutation::RegisterPixKey(k) => pix_key::register(tx, k).await,
        Mutation::RemovePixKey(k) => pix_key::remove(tx, k).await,
        Mutation::RecordTransaction(t) => transaction::apply(tx, t).await,
    }
}

fn entity_label(payload: &EventPayload) -> &'static str {
    match payload {
        EventPayload::Account(_) => "account",
        EventPayload::CreditCard(_) => "credit card",
        EventPayload::PixKey(_) => "PIX key",
        EventPayload::Transaction(_) => "transaction",
    }
}

// =========================================================================
// Stream worker
// =========================================================================

/// Worker timing
#[derive(Debug, Clone)]
pub struct ApplierConfig {
    /// Cursor owner in the event log
    pub consumer_group: String,
    /// Wait between fetches when the stream is drained (default: 250ms)
    pub poll_interval: Duration,
    /// Wait before redelivery after an apply error (default: 1s)
    pub retry_backoff: Duration,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            consumer_group: "ledger-applier".to_string(),
            poll_interval: Duration::from_millis(250),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Long-running consumer of one stream
pub struct StreamWorker {
    stream: Stream,
    log: Arc<dyn EventLog>,
    applier: Applier,
    config: ApplierConfig,
}

impl StreamWorker {
    pub fn new(
        stream: Stream,
        log: Arc<dyn EventLog>,
        applier: Applier,
        config: ApplierConfig,
    ) -> Self {
        Self {
            stream,
            log,
            applier,
            config,
        }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    /// Process at most one record. Returns `None` when the stream is drained.
    ///
    /// The cursor is committed only after the record was applied, rejected or
    /// skipped; on error it stays put and the record is fetched again.
    pub async fn step(&self) -> Result<Option<ApplyOutcome>, ApplyError> {
        let group = &self.config.consumer_group;
        let Some(record) = self.log.fetch(self.stream, group).await? else {
            return Ok(None);
        };

        let outcome = self.applier.apply_record(&record).await?;
        self.log.commit(self.stream, group, record.offset).await?;

        Ok(Some(outcome))
    }

    /// Apply everything currently in the stream
    pub async fn drain(&self) -> Result<Vec<ApplyOutcome>, ApplyError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.step().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Run until `shutdown` turns true. An apply in progress always finishes;
    /// only the idle and backoff waits are cut short.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(stream = %self.stream, group = %self.config.consumer_group, "Applier started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.step().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.config.poll_interval,
                Err(e) => {
                    tracing::error!(
                        stream = %self.stream,
                        error = %e,
                        "Apply failed, event will be redelivered"
                    );
                    self.config.retry_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(stream = %self.stream, "Applier stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// One worker per stream, sharing the log and applier
pub fn spawn_all(
    log: Arc<dyn EventLog>,
    applier: Applier,
    config: ApplierConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    Stream::ALL
        .into_iter()
        .map(|stream| {
            StreamWorker::new(stream, log.clone(), applier.clone(), config.clone())
                .spawn(shutdown.clone())
        })
        .collect()
}
