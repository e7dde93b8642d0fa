use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use txn_guard::api::{create_router, AppState, Route};
use txn_guard::config::Settings;
use txn_guard::context::RequestContext;
use txn_guard::error::{ApiError, AppError, Result};
use txn_guard::idempotency::{GuardDependencies, IdempotencyGuard, PostgresRequestLedger};
use txn_guard::observability::{init_logging, init_metrics, LogConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    init_logging(&LogConfig::from(&settings.application));
    info!("Configuration loaded");

    let metrics_handle = init_metrics()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to install metrics recorder: {}", e)))?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(settings.database.acquire_timeout())
        .connect(&settings.database.url)
        .await?;
    info!("Database connection established");

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    let ledger = Arc::new(PostgresRequestLedger::new(pool));
    let guard = Arc::new(IdempotencyGuard::new(GuardDependencies::new(ledger)));
    let state = AppState::new(guard).with_metrics(metrics_handle);
    let app = create_router(state, routes());

    let address = settings.application.bind_address();
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn routes() -> Vec<Route> {
    vec![
        Route::post("/orders", |ctx: RequestContext| async move {
            info!(request_id = %ctx.request_id, "Creating order");
            Ok::<_, ApiError>(json!({ "order": "created" }))
        }),
        Route::put("/orders/:id/cancel", |ctx: RequestContext| async move {
            let order_id = ctx
                .path
                .trim_start_matches("/orders/")
                .trim_end_matches("/cancel")
                .to_string();
            if order_id.is_empty() {
                return Err(ApiError::bad_request("order id is required"));
            }
            Ok(json!({ "order": order_id, "status": "cancelled" }))
        }),
    ]
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
