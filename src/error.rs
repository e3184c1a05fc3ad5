use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid config: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("telemetry setup failed: {0}")]
    Telemetry(String),

    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("metrics encoding failed: {0}")]
    Encode(#[source] prometheus::Error),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn client_code(&self) -> &'static str {
        match self {
            ServiceError::Config(_) => "CONFIG",
            ServiceError::Bind { .. } => "BIND",
            ServiceError::Serve(_) => "SERVE",
            ServiceError::Telemetry(_) => "TELEMETRY",
            ServiceError::Registration(_) => "REGISTRATION",
            ServiceError::Encode(_) => "ENCODE",
            ServiceError::NotFound => "NOT_FOUND",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.client_code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
