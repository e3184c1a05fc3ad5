use std::any::Any;
use std::sync::Arc;

use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_tracing_opentelemetry::middleware::{OtelAxumLayer, OtelInResponseLayer};
use tower_http::catch_panic::CatchPanicLayer;

use crate::api;
use crate::error::ServiceError;
use observability::{http_metrics_middleware, Metrics, PanicRecovered};

pub mod graceful_shutdown;
pub mod metrics;
pub mod observability;
pub mod tracing;

pub const METRICS_PATH: &str = "/metrics";

pub fn router() -> Router<Arc<Metrics>> {
    Router::new().route(METRICS_PATH, get(metrics::get_metrics).fallback(not_found))
}

/// The full service: route table, 404 fallback and the layer stack.
pub fn app(metrics: Arc<Metrics>) -> Router {
    let routes = Router::new()
        .merge(api::router())
        .merge(router())
        .fallback(not_found)
        .with_state(Arc::clone(&metrics));
    instrument(routes, metrics)
}

/// Wrap `routes` with panic recovery, request spans and HTTP metrics.
/// The metrics layer is outermost so recovered panics and 404s are counted.
pub fn instrument(routes: Router, metrics: Arc<Metrics>) -> Router {
    routes
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(OtelInResponseLayer::default())
        .layer(OtelAxumLayer::default())
        .layer(middleware::from_fn_with_state(metrics, http_metrics_middleware))
}

/// Unmatched paths, and matched paths with an unserved method.
pub async fn not_found() -> ServiceError {
    ServiceError::NotFound
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_owned()
    } else {
        "unknown panic payload".to_owned()
    };
    ::tracing::error!(panic = %detail, "handler panicked");
    let mut response = ServiceError::Internal("handler panicked".into()).into_response();
    response.extensions_mut().insert(PanicRecovered);
    response
}
