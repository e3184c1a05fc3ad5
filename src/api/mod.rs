use std::sync::Arc;

use axum::{routing::get, Router};

use crate::server::observability::Metrics;
use crate::server::not_found;

pub mod greeting;

pub fn router() -> Router<Arc<Metrics>> {
    Router::new().route("/", get(greeting::handle_root).fallback(not_found))
}
