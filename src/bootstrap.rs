use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    api::handler::AppState,
    config::Config,
    custody::ShareFetcher,
    error::AppResult,
    execution::solana::{SolanaConfig, SolanaSubmitter},
    ledger::LedgerRepository,
    settlement::{
        worker::WorkerConfig, PgSettlementStore, PipelineConfig, SettlementPipeline,
        SettlementQueue, SettlementWorker,
    },
};

pub struct App {
    pub state: AppState,
    pub worker_handle: JoinHandle<()>,
    pub shutdown: watch::Sender<bool>,
}

/// Build every component explicitly and wire them together. No global
/// clients: each handle is constructed here and passed down.
pub async fn initialize_app(config: &Config) -> AppResult<App> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_url).await?;

    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let queue = Arc::new(SettlementQueue::new(pool.clone()));

    let submitter = Arc::new(SolanaSubmitter::new(SolanaConfig {
        rpc_url: config.solana_rpc_url.clone(),
        confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        ..SolanaConfig::default()
    }));
    info!("✅ Solana submitter initialized ({})", config.solana_rpc_url);

    let share_fetcher = Arc::new(ShareFetcher::new(
        config.share_endpoints.clone(),
        Duration::from_millis(config.share_fetch_timeout_ms),
    ));
    info!(
        "✅ Share fetcher initialized: {} endpoints, threshold {}",
        config.share_endpoints.len(),
        config.share_threshold
    );

    let store = Arc::new(PgSettlementStore {
        ledger: ledger.clone(),
        queue: queue.clone(),
    });
    let pipeline = Arc::new(SettlementPipeline::new(
        store,
        share_fetcher,
        submitter.clone(),
        PipelineConfig {
            share_threshold: config.share_threshold,
            lamports_per_credit: config.lamports_per_credit,
            ..PipelineConfig::default()
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = SettlementWorker::new(
        queue.clone(),
        pipeline,
        WorkerConfig {
            poll_interval: Duration::from_millis(config.queue_poll_interval_ms),
            visibility_timeout: Duration::from_secs(config.queue_visibility_timeout_secs),
            max_concurrent_jobs: config.max_concurrent_jobs,
            ..WorkerConfig::default()
        },
        shutdown_rx,
    );
    let worker_handle = worker.start();
    info!("✅ Settlement worker started");

    let state = AppState {
        ledger,
        queue,
        submitter,
        min_withdrawal_credits: config.min_withdrawal_credits,
        custodial_address: config.custodial_address.clone(),
    };

    Ok(App {
        state,
        worker_handle,
        shutdown: shutdown_tx,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
