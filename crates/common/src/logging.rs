use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber: `RUST_LOG`-driven filter and a stderr formatter.
/// With the `otel` feature and `OTEL_EXPORTER_OTLP_ENDPOINT` set, spans are also
/// exported over OTLP under `service_name`.
pub fn init_tracing(service_name: &str, default_level: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    #[cfg(feature = "otel")]
    if std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT").is_some() {
        match otel::tracer(service_name) {
            Ok(tracer) => {
                registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .init();
                return;
            }
            Err(err) => {
                eprintln!("failed to initialise OTLP exporter, falling back to stderr: {err}");
            }
        }
    }

    #[cfg(not(feature = "otel"))]
    let _ = service_name;

    registry.init();
}

/// Flushes pending spans. No-op when the `otel` feature is disabled.
pub fn shutdown_tracer_provider() {
    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(feature = "otel")]
mod otel {
    use opentelemetry::trace::TraceError;
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{runtime, trace, Resource};

    pub(super) fn tracer(service_name: &str) -> Result<trace::Tracer, TraceError> {
        opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(trace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", service_name.to_string()),
            ])))
            .install_batch(runtime::Tokio)
    }
}
