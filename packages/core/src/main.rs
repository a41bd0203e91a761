use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;

use pharmacy_locator::alerts::consumer::run_change_consumer;
use pharmacy_locator::alerts::{AlertEngine, LogNotifier, WebhookNotifier};
use pharmacy_locator::api::{self, AppState};
use pharmacy_locator::cli::Cli;
use pharmacy_locator::config::Config;
use pharmacy_locator::db;
use pharmacy_locator::error::{AppError, StoreError};
use pharmacy_locator::geo::SpatialIndex;
use pharmacy_locator::inventory::InventoryLedger;
use pharmacy_locator::logging::init_logging;
use pharmacy_locator::metrics::AppMetrics;
use pharmacy_locator::ratings::RatingAggregator;
use pharmacy_locator::repository::SqliteRepository;
use pharmacy_locator::scheduler::run_alert_sweep;
use pharmacy_locator::search::AvailabilitySearch;
use pharmacy_locator::store::LocatorStore;

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    if let Err(err) = run().await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = Config::from_env()
        .and_then(|config| config.apply_cli(&cli))
        .map_err(AppError::Config)?;

    tracing::info!("Service starting with config: {:?}", config);

    // ---- Store of record ----
    let pool = db::create_pool(&config.database_url)
        .await
        .map_err(StoreError::from)?;
    let repository = Arc::new(SqliteRepository::new(pool));
    let store: Arc<dyn LocatorStore> = repository.clone();

    let metrics = Arc::new(AppMetrics::new().map_err(|err| AppError::Startup(err.to_string()))?);

    // ---- Restore in-memory state ----
    let index = Arc::new(SpatialIndex::new());
    index.rebuild(store.as_ref()).await?;

    let (change_tx, change_rx) = mpsc::unbounded_channel();
    let ledger = Arc::new(InventoryLedger::new(store.clone(), config.ledger_config()).with_change_sender(change_tx));
    ledger.restore().await?;
    metrics.inventory_records.set(ledger.len() as f64);

    let ratings = Arc::new(RatingAggregator::new(store.clone()));
    ratings.restore().await?;

    let mut engine =
        AlertEngine::new(ledger.clone(), store.clone(), config.alert_config()).with_notifier(Arc::new(LogNotifier));
    if let Some(url) = &config.alert_webhook_url {
        tracing::info!("Alert webhook enabled: {}", url);
        engine = engine.with_notifier(Arc::new(WebhookNotifier::new(url.clone())));
    }
    let engine = Arc::new(engine);
    engine.restore().await?;

    // ---- Background tasks ----
    tokio::spawn(run_change_consumer(engine.clone(), change_rx, metrics.clone()));
    let sweep = tokio::spawn(run_alert_sweep(
        engine.clone(),
        ledger.clone(),
        metrics.clone(),
        config.alert_sweep_interval_seconds,
        config.price_history_retention,
    ));

    // ---- HTTP ----
    let search = Arc::new(AvailabilitySearch::new(index.clone(), ledger.clone(), ratings.clone(), repository));
    let app = api::router(AppState {
        search,
        index,
        store,
        ledger,
        ratings,
        alerts: engine,
        metrics,
    });

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .map_err(|err| AppError::Startup(format!("cannot bind {}: {}", config.bind_address, err)))?;
    tracing::info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Startup(err.to_string()))?;

    if let Err(err) = sweep.await {
        tracing::warn!("Alert sweep task ended abnormally: {}", err);
    }
    tracing::info!("Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
}
