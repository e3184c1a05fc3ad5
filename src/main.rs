use std::sync::Arc;
use std::time::Duration;

use greeting_service::server::graceful_shutdown::graceful_shutdown;
use greeting_service::server::tracing::init_tracing_logging;
use greeting_service::{app, Metrics, ServiceConfig, ServiceError};

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    let cfg = ServiceConfig::load()?;
    init_tracing_logging(&cfg.service_name, cfg.loki_url()?)?;

    let metrics = Arc::new(Metrics::new(&cfg.process_metrics)?);
    metrics.spawn_process_sampler(Duration::from_secs(cfg.process_metrics.interval_secs));

    let listen = cfg.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|source| ServiceError::Bind {
            addr: listen.to_string(),
            source,
        })?;
    let local = listener.local_addr().map_err(ServiceError::Serve)?;

    tracing::info!(%local, service = %cfg.service_name, "greeting service listening");
    tracing::info!("Server can be stopped by CTRL-C");

    axum::serve(listener, app(metrics))
        .with_graceful_shutdown(graceful_shutdown())
        .await
        .map_err(ServiceError::Serve)?;

    tracing::info!("greeting service stopped");
    Ok(())
}
