//! digital_bank - ledger synchronization service
//!
//! Serves the HTTP API, publishes accepted requests to the event log and runs
//! one applier per stream that writes committed events to the ledger store.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use digital_bank::api::{self, AppState};
use digital_bank::applier::{self, Applier};
use digital_bank::event_log::{EventLog, PgEventLog};
use digital_bank::gateway::ValidationGateway;
use digital_bank::jobs::JobScheduler;
use digital_bank::notifications::{NotificationSink, StoreNotificationSink};
use digital_bank::producer::EventProducer;
use digital_bank::store::{LedgerStore, PgStore};
use digital_bank::{db, Config};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "digital_bank=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting digital_bank server");
    tracing::info!("Connecting to database...");

    let pool = db::connect_with_retry(
        &config.database_url,
        config.database_max_connections,
        config.database_connect_retries,
        config.database_retry_delay,
    )
    .await?;
    db::ensure_schema(&pool).await?;
    tracing::info!("Database connected successfully");

    let event_log = PgEventLog::connect(&config.event_log_brokers, config.database_max_connections)
        .await?;
    let log_pool = event_log.pool().clone();

    let store: Arc<dyn LedgerStore> = Arc::new(PgStore::new(pool.clone()));
    let log: Arc<dyn EventLog> = Arc::new(event_log);
    let notifier: Arc<dyn NotificationSink> = Arc::new(StoreNotificationSink::new(store.clone()));

    let producer = EventProducer::with_config(log.clone(), config.producer());
    let gateway = ValidationGateway::new(store.clone(), producer);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = applier::spawn_all(
        log.clone(),
        Applier::new(store.clone(), notifier),
        config.applier(),
        shutdown_rx.clone(),
    );
    workers.push(JobScheduler::new(store.clone()).start(shutdown_rx));

    let app = api::build_router(AppState::new(gateway, store));

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutting down, stopping appliers...");
    // Receivers may already be gone if every worker exited on its own
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }

    pool.close().await;
    log_pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
