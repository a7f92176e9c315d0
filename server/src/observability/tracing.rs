//! Subscriber setup for the turn service.
//!
//! Every process logs JSON lines to stdout. When export is enabled, spans and
//! log records are also shipped over OTLP/gRPC; attribute keys that can hold
//! stream credentials, webhook keys or citizen contact data are stripped from
//! spans before they leave the process.

use anyhow::Context as _;
use opentelemetry::KeyValue;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{
    BatchSpanProcessor, Sampler, SdkTracerProvider, SpanData, SpanExporter,
};
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::ObservabilityConfig;

/// Substrings of attribute keys never exported.
const SENSITIVE_KEYS: [&str; 11] = [
    "password",
    "token",
    "secret",
    "api_key",
    "credential",
    "authorization",
    "email",
    "national_id",
    "cedula",
    "phone",
    "verification",
];

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

fn scrub(attributes: &mut Vec<KeyValue>) {
    attributes.retain(|kv| !is_sensitive(kv.key.as_str()));
}

/// Span exporter wrapper that scrubs span and span-event attributes.
#[derive(Debug)]
struct ScrubbingExporter<E>(E);

impl<E: SpanExporter> SpanExporter for ScrubbingExporter<E> {
    async fn export(&self, mut batch: Vec<SpanData>) -> OTelSdkResult {
        for span in &mut batch {
            scrub(&mut span.attributes);
            span.events
                .events
                .iter_mut()
                .for_each(|event| scrub(&mut event.attributes));
        }
        self.0.export(batch).await
    }

    fn shutdown(&mut self) -> OTelSdkResult {
        self.0.shutdown()
    }

    fn force_flush(&mut self) -> OTelSdkResult {
        self.0.force_flush()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.0.set_resource(resource);
    }
}

struct Providers {
    traces: SdkTracerProvider,
    logs: SdkLoggerProvider,
}

impl Providers {
    fn build(config: &ObservabilityConfig) -> anyhow::Result<Self> {
        let resource = Resource::builder()
            .with_service_name(config.service_name.clone())
            .with_attributes([
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new(
                    "deployment.environment",
                    std::env::var("DEPLOYMENT_ENVIRONMENT").unwrap_or_else(|_| "local".into()),
                ),
            ])
            .build();

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
            .context("building OTLP span exporter")?;
        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
            .context("building OTLP log exporter")?;

        let traces = SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_sampler(Sampler::ParentBased(Box::new(
                Sampler::TraceIdRatioBased(config.trace_sample_ratio),
            )))
            .with_span_processor(BatchSpanProcessor::builder(ScrubbingExporter(spans)).build())
            .build();
        let logs = SdkLoggerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(logs)
            .build();

        Ok(Self { traces, logs })
    }
}

/// Flushes and stops exporters on drop. Hold it until `main` returns so the
/// last turns' spans are delivered.
pub struct OtelGuard {
    providers: Option<Providers>,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        let Some(providers) = self.providers.take() else {
            return;
        };
        if let Err(e) = providers.traces.shutdown() {
            tracing::warn!(error = %e, "Tracer provider shutdown failed");
        }
        if let Err(e) = providers.logs.shutdown() {
            tracing::warn!(error = %e, "Logger provider shutdown failed");
        }
    }
}

fn env_filter(config: &ObservabilityConfig, exporting: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = format!("{},parley_server=debug,tower_http=debug", config.log_level);
        // Exporter transports would otherwise log about their own exports.
        if exporting {
            directives.push_str(",hyper=off,tonic=off,h2=off");
        }
        EnvFilter::new(directives)
    })
}

/// Install the global subscriber.
///
/// Falls back to stdout-only logging when export is disabled or the OTLP
/// exporters cannot be built; the returned guard is then inert.
pub fn init(config: &ObservabilityConfig) -> OtelGuard {
    if !config.enabled {
        init_stdout(config);
        return OtelGuard { providers: None };
    }

    let providers = match Providers::build(config) {
        Ok(providers) => providers,
        Err(e) => {
            init_stdout(config);
            tracing::error!(error = %format!("{e:#}"), "OTLP export disabled");
            return OtelGuard { providers: None };
        }
    };

    let tracer = opentelemetry::trace::TracerProvider::tracer(&providers.traces, "parley-server");
    Registry::default()
        .with(env_filter(config, true))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(OpenTelemetryTracingBridge::new(&providers.logs))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    OtelGuard {
        providers: Some(providers),
    }
}

fn init_stdout(config: &ObservabilityConfig) {
    Registry::default()
        .with(env_filter(config, false))
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
