use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::{middleware::Next, response::Response};
use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_prometheus::PrometheusExporter;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, IntGauge, Opts, Registry, TextEncoder};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::ProcessMetricsConfig;
use crate::error::{Result, ServiceError};

const NAMESPACE: &str = "greeting";

pub const EXPOSITION_CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// `path` label for requests that matched no route, so scanners cannot grow the series set.
pub const UNMATCHED_PATH: &str = "unmatched";

/// Status recorded for requests whose future was dropped before a response existed.
pub const CLIENT_CLOSED_STATUS: u16 = 499;

/// Response extension set on responses produced from a recovered handler panic.
#[derive(Debug, Clone, Copy)]
pub struct PanicRecovered;

/// Metrics registry owned by one running app.
///
/// Holds its own Prometheus `Registry` and its own OpenTelemetry meter
/// provider, so two apps built in the same process never share counters.
pub struct Metrics {
    registry: Registry,
    // Dropping the provider shuts its reader down.
    _provider: SdkMeterProvider,
    http: HttpInstruments,
    process: ProcessCollector,
}

struct HttpInstruments {
    requests: Counter<u64>,
    duration_ms: Histogram<f64>,
    in_flight: UpDownCounter<i64>,
    exceptions: Counter<u64>,
}

impl Metrics {
    pub fn new(process_cfg: &ProcessMetricsConfig) -> Result<Self> {
        let registry = Registry::new();

        let exporter: PrometheusExporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| ServiceError::Telemetry(format!("prometheus exporter: {e}")))?;
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("greeting_service.http");
        let http = HttpInstruments {
            requests: meter
                .u64_counter("http_server_requests")
                .with_description("Total number of HTTP requests handled")
                .build(),
            duration_ms: meter
                .f64_histogram("http_server_request_duration_ms")
                .with_description("HTTP server request duration in milliseconds")
                .build(),
            in_flight: meter
                .i64_up_down_counter("http_server_requests_in_flight")
                .with_description("HTTP requests currently being served")
                .build(),
            exceptions: meter
                .u64_counter("http_server_request_exceptions")
                .with_description("Total number of HTTP requests that panicked in a handler")
                .build(),
        };

        let info = IntGauge::with_opts(
            Opts::new("service_info", "Build information of the greeting service")
                .namespace(NAMESPACE)
                .const_label("version", env!("CARGO_PKG_VERSION")),
        )?;
        info.set(1);
        registry.register(Box::new(info))?;

        let process = ProcessCollector::register(&registry, process_cfg)?;
        process.sample();

        Ok(Self {
            registry,
            _provider: provider,
            http,
            process,
        })
    }

    pub fn record_request(&self, method: &str, path: &str, status: u16, elapsed: Duration) {
        let attrs = [
            KeyValue::new("method", method.to_owned()),
            KeyValue::new("path", path.to_owned()),
            KeyValue::new("status", status.to_string()),
        ];
        self.http.requests.add(1, &attrs);
        self.http
            .duration_ms
            .record(elapsed.as_secs_f64() * 1000.0, &attrs);
    }

    pub fn record_exception(&self, method: &str, status: u16) {
        self.http.exceptions.add(
            1,
            &[
                KeyValue::new("method", method.to_owned()),
                KeyValue::new("status", status.to_string()),
            ],
        );
    }

    /// Refresh process gauges and encode every family in text exposition format.
    pub fn render(&self) -> Result<String> {
        self.process.sample();

        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(ServiceError::Encode)?;
        String::from_utf8(buffer).map_err(|e| ServiceError::Internal(e.to_string()))
    }

    /// Sample process gauges in the background so CPU usage has a delta to work with.
    pub fn spawn_process_sampler(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(every);
            loop {
                interval.tick().await;
                metrics.process.sample();
            }
        })
    }
}

struct ProcessCollector {
    system: Mutex<System>,
    pid: Pid,
    cpu: Gauge,
    rss: Gauge,
    vms: Option<Gauge>,
    start_time: Gauge,
}

impl ProcessCollector {
    fn register(registry: &Registry, cfg: &ProcessMetricsConfig) -> Result<Self> {
        let cpu = gauge(
            "process_cpu_usage",
            "Process CPU usage percentage (can exceed 100% on multi-core)",
        )?;
        let rss = gauge(
            "process_memory_rss_bytes",
            "Process resident set size (RSS) in bytes",
        )?;
        let start_time = gauge(
            "process_start_time_seconds",
            "Start time of the process since unix epoch in seconds",
        )?;
        let vms = if cfg.include_virtual_memory {
            Some(gauge(
                "process_memory_virtual_bytes",
                "Process virtual memory size (address space) in bytes; not resident RAM",
            )?)
        } else {
            None
        };

        registry.register(Box::new(cpu.clone()))?;
        registry.register(Box::new(rss.clone()))?;
        registry.register(Box::new(start_time.clone()))?;
        if let Some(g) = &vms {
            registry.register(Box::new(g.clone()))?;
        }

        Ok(Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
            cpu,
            rss,
            vms,
            start_time,
        })
    }

    fn sample(&self) {
        let mut sys = self.system.lock();
        sys.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let Some(proc_) = sys.process(self.pid) else {
            tracing::debug!(pid = %self.pid, "current process not found, skipping sample");
            return;
        };

        self.cpu.set(f64::from(proc_.cpu_usage()));
        self.rss.set(proc_.memory() as f64);
        self.start_time.set(proc_.start_time() as f64);
        if let Some(g) = &self.vms {
            g.set(proc_.virtual_memory() as f64);
        }
    }
}

fn gauge(name: &str, help: &str) -> Result<Gauge> {
    Ok(Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?)
}

/// Tracks one request from entry to completion or cancellation.
///
/// The in-flight gauge goes back down and the request is recorded on drop,
/// so a future dropped mid-request (client gone, timeout, shutdown) is
/// still accounted for with `CLIENT_CLOSED_STATUS`.
struct InFlightRequest {
    metrics: Arc<Metrics>,
    method: String,
    path: String,
    start: Instant,
    status: Option<u16>,
}

impl InFlightRequest {
    fn start(metrics: Arc<Metrics>, method: String, path: String) -> Self {
        metrics
            .http
            .in_flight
            .add(1, &[KeyValue::new("method", method.clone())]);
        Self {
            metrics,
            method,
            path,
            start: Instant::now(),
            status: None,
        }
    }

    fn complete(&mut self, status: u16) {
        self.status = Some(status);
    }
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        self.metrics
            .http
            .in_flight
            .add(-1, &[KeyValue::new("method", self.method.clone())]);
        let status = self.status.unwrap_or(CLIENT_CLOSED_STATUS);
        self.metrics
            .record_request(&self.method, &self.path, status, self.start.elapsed());
    }
}

/// Records method, path, status and latency for every response, including
/// fallback 404s, recovered panics and requests dropped before completion.
pub async fn http_metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().as_str().to_owned();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_PATH.to_owned());

    let mut in_flight = InFlightRequest::start(Arc::clone(&metrics), method, path);
    let res = next.run(req).await;

    let status = res.status().as_u16();
    if res.extensions().get::<PanicRecovered>().is_some() {
        metrics.record_exception(&in_flight.method, status);
    }
    in_flight.complete(status);
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> Metrics {
        Metrics::new(&ProcessMetricsConfig::default()).unwrap()
    }

    #[test]
    fn render_includes_process_and_info_families() {
        let body = metrics().render().unwrap();
        assert!(body.contains("greeting_process_cpu_usage"));
        assert!(body.contains("greeting_process_memory_rss_bytes"));
        assert!(body.contains("greeting_service_info{version=\""));
    }

    #[test]
    fn virtual_memory_gauge_is_optional() {
        let cfg = ProcessMetricsConfig {
            include_virtual_memory: false,
            ..ProcessMetricsConfig::default()
        };
        let body = Metrics::new(&cfg).unwrap().render().unwrap();
        assert!(!body.contains("greeting_process_memory_virtual_bytes"));
    }

    #[test]
    fn recorded_requests_show_up_in_exposition() {
        let m = metrics();
        m.record_request("GET", "/", 200, Duration::from_millis(3));
        let body = m.render().unwrap();

        let line = body
            .lines()
            .find(|l| l.starts_with("http_server_requests") && l.contains("path=\"/\""))
            .expect("request counter line");
        assert!(line.contains("method=\"GET\""));
        assert!(line.contains("status=\"200\""));
        assert!(body.contains("http_server_request_duration_ms_bucket"));
    }

    #[test]
    fn duplicate_registration_is_a_registration_error() {
        let registry = Registry::new();
        let cfg = ProcessMetricsConfig::default();
        assert!(ProcessCollector::register(&registry, &cfg).is_ok());
        assert!(matches!(
            ProcessCollector::register(&registry, &cfg),
            Err(ServiceError::Registration(_))
        ));
    }

    #[test]
    fn registries_are_isolated() {
        let a = metrics();
        let b = metrics();
        a.record_request("GET", "/", 200, Duration::from_millis(1));
        assert!(!b.render().unwrap().contains("path=\"/\""));
    }
}
