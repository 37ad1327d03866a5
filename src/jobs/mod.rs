//! Scheduled Jobs
//!
//! Background jobs for periodic maintenance: notification retention and
//! ledger reconciliation.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

use crate::store::{LedgerDiscrepancy, LedgerStore, StoreError};

/// Notifications older than this are deleted
pub const NOTIFICATION_RETENTION_DAYS: i64 = 30;

// =========================================================================
// Notification retention
// =========================================================================

/// Delete notifications older than the retention window
pub async fn delete_old_notifications(
    store: &dyn LedgerStore,
    now: DateTime<Utc>,
) -> Result<u64, JobError> {
    let cutoff = now - ChronoDuration::days(NOTIFICATION_RETENTION_DAYS);
    let rows_deleted = store.delete_notifications_before(cutoff).await?;

    if rows_deleted > 0 {
        tracing::info!(rows_deleted = rows_deleted, "Deleted old notifications");
    }

    Ok(rows_deleted)
}

// =========================================================================
// Ledger reconciliation
// =========================================================================

/// Compare every balance and available limit with its transaction history.
/// Discrepancies are reported, never corrected.
pub async fn reconcile_ledger(store: &dyn LedgerStore) -> Result<Vec<LedgerDiscrepancy>, JobError> {
    let discrepancies = store.ledger_discrepancies().await?;

    for d in &discrepancies {
        tracing::warn!(
            entity = %d.entity,
            id = %d.id,
            recorded = %d.recorded,
            expected = %d.expected,
            "Ledger discrepancy detected"
        );
    }

    Ok(discrepancies)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for notification retention (default: 1 hour)
    pub notification_cleanup_interval: Duration,
    /// Interval for ledger reconciliation (default: 10 minutes)
    pub reconciliation_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            notification_cleanup_interval: Duration::from_secs(3600),
            reconciliation_interval: Duration::from_secs(600),
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    store: Arc<dyn LedgerStore>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(store: Arc<dyn LedgerStore>, config: JobSchedulerConfig) -> Self {
        Self { store, config }
    }

    /// Start the job scheduler in the background
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Run the scheduler loop until shutdown
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Job scheduler started");

        let mut cleanup_interval = interval(self.config.notification_cleanup_interval);
        let mut reconciliation_interval = interval(self.config.reconciliation_interval);

        loop {
            tokio::select! {
                _ = cleanup_interval.tick() => {
                    if let Err(e) = delete_old_notifications(self.store.as_ref(), Utc::now()).await {
                        tracing::error!(error = %e, "Notification cleanup failed");
                    }
                }
                _ = reconciliation_interval.tick() => {
                    if let Err(e) = reconcile_ledger(self.store.as_ref()).await {
                        tracing::error!(error = %e, "Ledger reconciliation failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Job scheduler stopped");
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match delete_old_notifications(self.store.as_ref(), Utc::now()).await {
            Ok(count) => report.notifications_deleted = count,
            Err(e) => report.errors.push(format!("Notification cleanup: {}", e)),
        }

        match reconcile_ledger(self.store.as_ref()).await {
            Ok(discrepancies) => report.discrepancies = discrepancies,
            Err(e) => report.errors.push(format!("Ledger reconciliation: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub notifications_deleted: u64,
    pub discrepancies: Vec<LedgerDiscrepancy>,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =========================================================================
// Tests
// =========================================================================
