mod api;
mod bootstrap;
mod config;
mod custody;
mod error;
mod execution;
mod ledger;
mod middleware;
mod server;
mod settlement;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,taskpay_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("🚀 Starting Taskpay Settlement Backend");

    dotenv::dotenv().ok();
    let config = config::Config::from_env()?;

    let app = bootstrap::initialize_app(&config).await?;
    let router = server::create_app(app.state);

    let shutdown_tx = app.shutdown;
    let shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        shutdown_tx.send(true).ok();
    });

    server::run_server(router, &config.bind_address, shutdown_rx).await?;

    // Let in-flight settlements record their outcome before exiting.
    app.worker_handle.await.ok();
    info!("✓ Shutdown complete");

    Ok(())
}
