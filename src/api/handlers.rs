use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::responses::MessageResponse;
use super::routes::{AppState, RouteHandler};
use crate::context::RequestContext;
use crate::idempotency::{FaultResponse, GuardOutcome};
use crate::observability::{get_metrics, AggregatedHealth, LatencyTimer};

/// Largest request body buffered for a guarded handler.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Runs one request through the guard and the business handler.
///
/// `route` is the registered path template and only labels HTTP metrics; the
/// idempotency key uses the concrete request path. The guarded lifecycle is
/// spawned so that a client disconnect, which drops this future, neither
/// cancels the handler nor skips the ledger update.
pub async fn guarded(
    state: AppState,
    handler: Arc<dyn RouteHandler>,
    route: Arc<str>,
    req: Request,
) -> Response {
    let timer = LatencyTimer::new();
    let (parts, body) = req.into_parts();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();

    tracing::debug!(path = %path, method = %method, "Dispatching guarded request");

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path, "Failed to read request body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(MessageResponse::new("unable to read request body")),
            )
                .into_response();
        }
    };

    let ctx = RequestContext::new(parts.method, path.clone(), parts.headers, body);
    let guard = Arc::clone(&state.guard);

    let task = tokio::spawn(async move {
        guard
            .execute(ctx, move |ctx| async move { handler.handle(ctx).await })
            .await
    });

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(path = %path, "Guarded request task failed: {}", e);
            GuardOutcome::Faulted(FaultResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            ))
        }
    };

    let response = outcome.into_response();
    get_metrics().record_http_request(&method, &route, response.status().as_u16(), timer.elapsed_ms());
    response
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<AggregatedHealth>) {
    let health = state.health_checker.check_all().await;
    let status = if health.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(health))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics not enabled").into_response(),
    }
}
