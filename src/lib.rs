//! Greeting service: `GET /` returns a fixed HTML greeting, `GET /metrics`
//! exposes request and process metrics in Prometheus text format.

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use server::{app, observability::Metrics};
