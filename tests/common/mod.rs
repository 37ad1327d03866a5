//! Common test utilities
//!
//! In-memory pipeline: gateway -> memory log -> appliers -> memory store.
//! [`setup_test_db`] builds the same pipeline on PostgreSQL.

#![allow(dead_code)]

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use digital_bank::api::{self, AppState};
use digital_bank::applier::{ApplierConfig, Applier, ApplyOutcome, StreamWorker};
use digital_bank::domain::{Account, AccountType, Amount, Balance, CreditCard, Stream};
use digital_bank::db;
use digital_bank::event_log::{EventLog, MemoryEventLog, PgEventLog};
use digital_bank::gateway::ValidationGateway;
use digital_bank::notifications::{FakeNotificationSink, NotificationSink, StoreNotificationSink};
use digital_bank::producer::{EventProducer, ProducerConfig};
use digital_bank::store::{LedgerStore, MemoryStore, PgStore};

pub struct Pipeline {
    pub store: Arc<MemoryStore>,
    pub log: Arc<MemoryEventLog>,
    pub gateway: ValidationGateway,
    pub sink: FakeNotificationSink,
    pub applier: Applier,
}

impl Pipeline {
    /// Pipeline whose notifications go to a recording fake
    pub fn new() -> Self {
        let sink = FakeNotificationSink::new();
        Self::build(Arc::new(sink.clone()), sink)
    }

    /// Pipeline whose notifications are written to the store, as in production
    pub fn with_stored_notifications() -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(StoreNotificationSink::new(store.clone()));
        Self::assemble(store, notifier, FakeNotificationSink::new())
    }

    fn build(notifier: Arc<dyn NotificationSink>, sink: FakeNotificationSink) -> Self {
        Self::assemble(Arc::new(MemoryStore::new()), notifier, sink)
    }

    fn assemble(
        store: Arc<MemoryStore>,
        notifier: Arc<dyn NotificationSink>,
        sink: FakeNotificationSink,
    ) -> Self {
        let log = Arc::new(MemoryEventLog::new());
        let producer = EventProducer::with_config(
            log.clone(),
            ProducerConfig {
                max_retries: 2,
                retry_backoff: std::time::Duration::from_millis(1),
            },
        );
        let gateway = ValidationGateway::new(store.clone(), producer);
        let applier = Applier::new(store.clone(), notifier);

        Self {
            store,
            log,
            gateway,
            sink,
            applier,
        }
    }

    pub fn worker(&self, stream: Stream) -> StreamWorker {
        let log: Arc<dyn EventLog> = self.log.clone();
        StreamWorker::new(stream, log, self.applier.clone(), ApplierConfig::default())
    }

    /// Apply everything published so far, stream by stream in dependency order
    pub async fn drain(&self) -> Vec<ApplyOutcome> {
        let mut outcomes = Vec::new();
        for stream in Stream::ALL {
            outcomes.extend(self.worker(stream).drain().await.unwrap());
        }
        outcomes
    }

    pub fn router(&self) -> axum::Router {
        let store: Arc<dyn LedgerStore> = self.store.clone();
        api::build_router(AppState::new(self.gateway.clone(), store))
    }

    pub async fn seed_account(&self, balance: Decimal) -> Account {
        let mut account = Account::open(AccountType::Checking);
        account.balance = Balance::new(balance).unwrap();
        self.store.seed_account(account.clone()).await;
        account
    }

    pub async fn seed_card(&self, account: &Account, limit: Decimal, available: Decimal) -> CreditCard {
        let mut card = CreditCard::issue(account.id, Amount::new(limit).unwrap());
        card.available_limit = Balance::new(available).unwrap();
        self.store.seed_credit_card(card.clone()).await;
        card
    }

    pub async fn balance(&self, account_id: Uuid) -> Decimal {
        self.store
            .get_account(account_id)
            .await
            .unwrap()
            .expect("account exists")
            .balance
            .value()
    }

    pub async fn available_limit(&self, card_id: Uuid) -> Decimal {
        self.store
            .get_credit_card(card_id)
            .await
            .unwrap()
            .expect("card exists")
            .available_limit
            .value()
    }
}

// =========================================================================
// PostgreSQL
// =========================================================================

/// Pipeline on PostgreSQL, isolated in a schema of its own so tests can run
/// in parallel against one database
pub struct PgPipeline {
    pub pool: PgPool,
    pub store: Arc<PgStore>,
    pub log: Arc<PgEventLog>,
    pub gateway: ValidationGateway,
    pub sink: FakeNotificationSink,
    pub applier: Applier,
    database_url: String,
    schema: String,
}

/// Setup test database. Returns `None` when DATABASE_URL is not set.
pub async fn setup_test_db() -> Option<PgPipeline> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };

    let schema = format!("test_{}", Uuid::new_v4().simple());
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");
    admin
        .execute(format!("CREATE SCHEMA {}", schema).as_str())
        .await
        .expect("Failed to create test schema");
    admin.close().await;

    let search_path = schema.clone();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .after_connect(move |conn, _meta| {
            let statement = format!("SET search_path TO {}", search_path);
            Box::pin(async move {
                conn.execute(statement.as_str()).await?;
                Ok(())
            })
        })
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    db::ensure_schema(&pool).await.expect("Failed to create ledger schema");
    let log = Arc::new(PgEventLog::new(pool.clone()));
    log.ensure_schema().await.expect("Failed to create log schema");

    let store = Arc::new(PgStore::new(pool.clone()));
    let producer = EventProducer::with_config(
        log.clone(),
        ProducerConfig {
            max_retries: 2,
            retry_backoff: std::time::Duration::from_millis(1),
        },
    );
    let gateway = ValidationGateway::new(store.clone(), producer);
    let sink = FakeNotificationSink::new();
    let applier = Applier::new(store.clone(), Arc::new(sink.clone()));

    Some(PgPipeline {
        pool,
        store,
        log,
        gateway,
        sink,
        applier,
        database_url,
        schema,
    })
}

impl PgPipeline {
    pub fn worker(&self, stream: Stream) -> StreamWorker {
        let log: Arc<dyn EventLog> = self.log.clone();
        StreamWorker::new(stream, log, self.applier.clone(), ApplierConfig::default())
    }

    pub async fn drain(&self) -> Vec<ApplyOutcome> {
        let mut outcomes = Vec::new();
        for stream in Stream::ALL {
            outcomes.extend(self.worker(stream).drain().await.unwrap());
        }
        outcomes
    }

    pub async fn balance(&self, account_id: Uuid) -> Decimal {
        self.store
            .get_account(account_id)
            .await
            .unwrap()
            .expect("account exists")
            .balance
            .value()
    }

    pub async fn available_limit(&self, card_id: Uuid) -> Decimal {
        self.store
            .get_credit_card(card_id)
            .await
            .unwrap()
            .expect("card exists")
            .available_limit
            .value()
    }

    /// Drop the test schema
    pub async fn teardown(self) {
        self.pool.close().await;

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.database_url)
            .await
            .expect("Failed to connect to DB");
        admin
            .execute(format!("DROP SCHEMA {} CASCADE", self.schema).as_str())
            .await
            .expect("Failed to drop test schema");
        admin.close().await;
    }
}
