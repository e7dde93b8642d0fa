use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    routing::{get, on, MethodFilter, MethodRouter},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::context::RequestContext;
use crate::error::ApiError;
use crate::idempotency::IdempotencyGuard;
use crate::observability::HealthChecker;

/// A business handler registered behind the guard.
#[async_trait]
pub trait RouteHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: RequestContext) -> Result<Value, ApiError>;
}

#[async_trait]
impl<F, Fut> RouteHandler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
{
    async fn handle(&self, ctx: RequestContext) -> Result<Value, ApiError> {
        (self)(ctx).await
    }
}

/// One entry of the route table.
#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub method: String,
    pub handler: Arc<dyn RouteHandler>,
}

impl Route {
    pub fn new(path: impl Into<String>, method: impl Into<String>, handler: impl RouteHandler) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn get(path: impl Into<String>, handler: impl RouteHandler) -> Self {
        Self::new(path, "GET", handler)
    }

    pub fn post(path: impl Into<String>, handler: impl RouteHandler) -> Self {
        Self::new(path, "POST", handler)
    }

    pub fn put(path: impl Into<String>, handler: impl RouteHandler) -> Self {
        Self::new(path, "PUT", handler)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<IdempotencyGuard>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(guard: Arc<IdempotencyGuard>) -> Self {
        let health_checker = Arc::new(HealthChecker::new(Arc::clone(guard.ledger())));
        Self {
            guard,
            health_checker,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

fn method_filter(method: &str) -> Option<MethodFilter> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Some(MethodFilter::GET),
        "POST" => Some(MethodFilter::POST),
        "PUT" => Some(MethodFilter::PUT),
        "OPTIONS" => Some(MethodFilter::OPTIONS),
        "DELETE" => Some(MethodFilter::DELETE),
        "PATCH" => Some(MethodFilter::PATCH),
        _ => None,
    }
}

/// Creates the router: health endpoints plus every route wrapped by the guard.
///
/// Routes with an unknown method, or a repeated path and method pair, are
/// logged and skipped.
pub fn create_router(state: AppState, routes: Vec<Route>) -> Router {
    let mut by_path: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
    let mut seen = HashSet::new();

    for route in routes {
        let Some(filter) = method_filter(&route.method) else {
            tracing::warn!(path = %route.path, method = %route.method, "Unknown route configuration, skipping");
            continue;
        };
        if !seen.insert((route.path.clone(), route.method.to_ascii_uppercase())) {
            tracing::warn!(path = %route.path, method = %route.method, "Route registered twice, skipping");
            continue;
        }

        let handler = Arc::clone(&route.handler);
        let template: Arc<str> = Arc::from(route.path.as_str());
        let endpoint = move |State(state): State<AppState>, req: Request| {
            let handler = Arc::clone(&handler);
            let template = Arc::clone(&template);
            async move { handlers::guarded(state, handler, template, req).await }
        };

        let method_router = match by_path.remove(&route.path) {
            Some(existing) => existing.on(filter, endpoint),
            None => on(filter, endpoint),
        };
        by_path.insert(route.path, method_router);
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        .route("/metrics", get(handlers::metrics_endpoint));

    let route_count = by_path.len();
    for (path, method_router) in by_path {
        router = router.route(&path, method_router);
    }
    tracing::info!(paths = route_count, "Loaded all routes");

    router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_filter() {
        assert!(method_filter("GET").is_some());
        assert!(method_filter("post").is_some());
        assert!(method_filter("OPTIONS").is_some());
        assert!(method_filter("TRACE").is_none());
        assert!(method_filter("").is_none());
    }

    #[test]
    fn test_route_constructors() {
        let route = Route::post("/orders", |_ctx: RequestContext| async {
            Ok::<_, ApiError>(serde_json::json!({}))
        });
        assert_eq!(route.method, "POST");
        assert_eq!(route.path, "/orders");
        assert!(format!("{:?}", route).contains("/orders"));
    }
}
