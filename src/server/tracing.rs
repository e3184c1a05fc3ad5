use std::process;

use tracing::Event;
use tracing_loki::url::Url;
use tracing_subscriber::fmt::{
    format::{DefaultFields, FormatEvent, FormatFields, Writer},
    FmtContext,
};
use tracing_subscriber::{fmt, prelude::*, registry::LookupSpan, EnvFilter};

use crate::error::{Result, ServiceError};

struct AppIdWrapper<F> {
    inner: F,
    app: String,
}

impl<F> AppIdWrapper<F> {
    fn new(inner: F, app: impl Into<String>) -> Self {
        Self {
            inner,
            app: app.into(),
        }
    }
}

impl<S, N, F> FormatEvent<S, N> for AppIdWrapper<F>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write!(writer, "application={} ", self.app)?;
        self.inner.format_event(ctx, writer, event)
    }
}

/// Install the global subscriber. Logs go to stdout, and to Loki when
/// `loki_url` is set; the Loki shipping task is spawned on the current runtime.
pub fn init_tracing_logging(service_name: &str, loki_url: Option<Url>) -> Result<()> {
    // Respect RUST_LOG, default to info if not set
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| ServiceError::Telemetry(format!("log filter: {e}")))?;

    let app_format = AppIdWrapper::new(fmt::format().compact(), service_name);
    let fmt_layer = fmt::layer()
        .fmt_fields(DefaultFields::new())
        .event_format(app_format);

    let loki_layer = match loki_url {
        Some(url) => {
            let (layer, task) = tracing_loki::builder()
                .label("host", format!("{service_name}-host"))
                .and_then(|b| b.extra_field("pid", format!("{}", process::id())))
                .and_then(|b| b.build_url(url))
                .map_err(|e| ServiceError::Telemetry(format!("loki: {e}")))?;
            tokio::spawn(task);
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(loki_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ServiceError::Telemetry(format!("subscriber: {e}")))
}
