use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_stdout::SpanExporter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const OTEL_STDOUT_ENV: &str = "BEACH_COMMANDS_OTEL_STDOUT";
const SERVICE_NAME: &str = "beach-commands";

/// Process-wide logging, tracing and metrics. Flushes spans on drop.
pub struct Telemetry {
    metrics_handle: PrometheusHandle,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn init() -> Result<Self> {
        let metrics_handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus metrics recorder")?;

        let tracer_provider = env_truthy(OTEL_STDOUT_ENV).then(stdout_tracer_provider);
        let otel_layer = tracer_provider.as_ref().map(|provider| {
            global::set_tracer_provider(provider.clone());
            tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME))
        });

        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(otel_layer)
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        if tracer_provider.is_some() {
            info!("OpenTelemetry stdout exporter enabled ({OTEL_STDOUT_ENV}=1)");
        }

        Ok(Self {
            metrics_handle,
            tracer_provider,
        })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = &self.tracer_provider {
            if let Err(err) = provider.shutdown() {
                warn!(error = %err, "failed to shutdown OpenTelemetry tracer provider");
            }
        }
    }
}

fn stdout_tracer_provider() -> SdkTracerProvider {
    SdkTracerProvider::builder()
        .with_simple_exporter(SpanExporter::default())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(
            Resource::builder()
                .with_attributes(vec![KeyValue::new("service.name", SERVICE_NAME)])
                .build(),
        )
        .build()
}

fn env_truthy(key: &str) -> bool {
    std::env::var(key).is_ok_and(|val| {
        matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
