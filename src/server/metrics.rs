use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::error::Result;
use crate::server::observability::{Metrics, EXPOSITION_CONTENT_TYPE};

pub async fn get_metrics(State(metrics): State<Arc<Metrics>>) -> Result<impl IntoResponse> {
    tracing::debug!("/metrics scraped");
    let body = metrics.render()?;
    Ok(([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body))
}
