/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Process-wide `tracing` setup shared by both Skiff binaries.
//!
//! `RUST_LOG` takes precedence over the configured level. When the resolved
//! telemetry section is enabled, spans are additionally exported over OTLP.
//!
//! ```rust,ignore
//! let settings = skiff_utils::Settings::new(None)?;
//! skiff_utils::telemetry::init(
//!     &settings.telemetry.for_builder(),
//!     &settings.log.level,
//!     &settings.log.format,
//! )?;
//! ```

use crate::config::ResolvedTelemetry;
use crate::logging::level_filter;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("cannot build OTLP exporter for {endpoint}: {reason}")]
    Exporter { endpoint: String, reason: String },
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(
    config: &ResolvedTelemetry,
    log_level: &str,
    log_format: &str,
) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level_filter(log_level).into()));
    let otel = match config.enabled {
        true => Some(tracing_opentelemetry::layer().with_tracer(otlp_tracer(config)?)),
        false => None,
    };
    let (json, text) = if log_format.eq_ignore_ascii_case("json") {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json)
        .with(text)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}

fn otlp_tracer(config: &ResolvedTelemetry) -> Result<Tracer, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            endpoint: config.otlp_endpoint.clone(),
            reason: e.to_string(),
        })?;

    let resource = Resource::new([
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ]);
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler(config.sampling_rate))
        .with_resource(resource)
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracer)
}

fn sampler(rate: f64) -> Sampler {
    match rate {
        r if r >= 1.0 => Sampler::AlwaysOn,
        r if r <= 0.0 => Sampler::AlwaysOff,
        r => Sampler::TraceIdRatioBased(r),
    }
}

/// Flushes pending spans. A no-op when export was never enabled.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
