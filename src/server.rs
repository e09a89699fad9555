use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::info;

use crate::{
    api::handler::{
        credit_earnings, get_balance, get_custodial_balance, get_payout_history, health_check,
        register_worker, request_withdrawal, unlock_failed_payout, AppState,
    },
    middleware::{rate_limit_middleware, RateLimitLayer},
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let withdraw_limiter = RateLimitLayer::new(10, 60);

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Worker registration and collaborator interfaces
                .route("/workers", post(register_worker))
                .route("/workers/:worker_id/credit", post(credit_earnings))
                .route("/workers/:worker_id/balance", get(get_balance))
                .route("/workers/:worker_id/payouts", get(get_payout_history))
                // Lock trigger: the settlement outcome surfaces through
                // payout history, never through this response
                .route(
                    "/payouts/withdraw",
                    post(request_withdrawal).layer(middleware::from_fn_with_state(
                        withdraw_limiter,
                        rate_limit_middleware,
                    )),
                )
                // Admin endpoints
                .route(
                    "/admin/payouts/:record_id/unlock",
                    post(unlock_failed_payout),
                )
                .route("/admin/custodial/balance", get(get_custodial_balance)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    let mut shutdown = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.changed().await.ok();
        })
        .await?;
    Ok(())
}
