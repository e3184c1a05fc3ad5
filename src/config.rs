//! Service configuration.
//!
//! Every field has a default, so the service starts with no configuration at
//! all. A YAML file named by `GREETING_CONFIG` may override the defaults
//! (unknown fields are rejected), and `GREETING_LISTEN` / `GREETING_LOKI_URL`
//! override the file.

use std::fs;
use std::net::SocketAddr;

use serde::Deserialize;
use tracing_loki::url::Url;

use crate::error::{Result, ServiceError};

pub const CONFIG_PATH_ENV: &str = "GREETING_CONFIG";
pub const LISTEN_ENV: &str = "GREETING_LISTEN";
pub const LOKI_URL_ENV: &str = "GREETING_LOKI_URL";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub loki_url: Option<String>,

    #[serde(default)]
    pub process_metrics: ProcessMetricsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            service_name: default_service_name(),
            loki_url: None,
            process_metrics: ProcessMetricsConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from defaults, the optional file, then the environment.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => load_from_file(&path)?,
            Err(_) => ServiceConfig::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(LISTEN_ENV) {
            self.listen = listen;
        }
        if let Some(url) = lookup(LOKI_URL_ENV) {
            self.loki_url = if url.trim().is_empty() { None } else { Some(url) };
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        if self.service_name.trim().is_empty() {
            return Err(ServiceError::Config("service_name must not be empty".into()));
        }
        self.loki_url()?;
        self.process_metrics.validate()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            ServiceError::Config(format!("listen must be a valid SocketAddr ({}): {e}", self.listen))
        })
    }

    pub fn loki_url(&self) -> Result<Option<Url>> {
        self.loki_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| ServiceError::Config(format!("loki_url is not a valid URL: {e}")))
            })
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessMetricsConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_include_virtual_memory")]
    pub include_virtual_memory: bool,
}

impl Default for ProcessMetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            include_virtual_memory: default_include_virtual_memory(),
        }
    }
}

impl ProcessMetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=3600).contains(&self.interval_secs) {
            return Err(ServiceError::Config(
                "process_metrics.interval_secs must be between 1 and 3600".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_from_file(path: &str) -> Result<ServiceConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| ServiceError::Config(format!("read {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ServiceConfig> {
    let cfg: ServiceConfig = serde_yaml::from_str(s)
        .map_err(|e| ServiceError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}
fn default_service_name() -> String {
    "greeting-service".into()
}
fn default_interval_secs() -> u64 {
    5
}
// Virtual address space on macOS is tens of GB of reservations, not RAM.
fn default_include_virtual_memory() -> bool {
    cfg!(not(target_os = "macos"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ServiceConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.listen_addr().unwrap().port(), 8080);
        assert!(cfg.loki_url().unwrap().is_none());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = load_from_str("{}").unwrap();
        assert_eq!(cfg.service_name, "greeting-service");
        assert_eq!(cfg.process_metrics.interval_secs, 5);
    }

    #[test]
    fn deny_unknown_fields_nested() {
        let bad = r#"
listen: "127.0.0.1:9000"
process_metrics:
  interval_sec: 10 # typo should fail
"#;
        let err = load_from_str(bad).unwrap_err();
        assert_eq!(err.client_code(), "CONFIG");
    }

    #[test]
    fn rejects_bad_listen() {
        let err = load_from_str("listen: not-an-addr").unwrap_err();
        assert!(err.to_string().contains("listen"));
    }

    #[test]
    fn rejects_zero_interval() {
        let err = load_from_str("process_metrics: { interval_secs: 0 }").unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn rejects_bad_loki_url() {
        assert!(load_from_str("loki_url: \"::nope\"").is_err());
    }

    #[test]
    fn env_overrides_win() {
        let mut cfg = load_from_str("listen: \"127.0.0.1:9000\"").unwrap();
        cfg.apply_overrides(|key| match key {
            LISTEN_ENV => Some("127.0.0.1:9100".into()),
            LOKI_URL_ENV => Some("http://loki:3100".into()),
            _ => None,
        });
        cfg.validate().unwrap();
        assert_eq!(cfg.listen_addr().unwrap().port(), 9100);
        assert_eq!(
            cfg.loki_url().unwrap().map(|u| u.to_string()),
            Some("http://loki:3100/".to_string())
        );
    }

    #[test]
    fn blank_loki_override_disables_shipping() {
        let mut cfg = load_from_str("loki_url: \"http://loki:3100\"").unwrap();
        cfg.apply_overrides(|key| (key == LOKI_URL_ENV).then(String::new));
        assert!(cfg.loki_url.is_none());
    }
}
