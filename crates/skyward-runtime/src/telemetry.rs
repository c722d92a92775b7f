//! Logging and span export for the planner process.
//!
//! [`init_tracing`] installs the global subscriber once at start-up.
//! [`cycle_span`] and [`record_cycle`] give every planning cycle the same
//! span layout, so console lines, JSON lines and exported spans all carry
//! the cycle outcome.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `SKYWARD_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL (e.g. `http://localhost:4318`). Cycle spans are exported when set. |
//!
//! # Cycle span
//!
//! | Field | Recorded |
//! |---|---|
//! | `cycle` | on entry, 1-based cycle number |
//! | `mode` | on exit, [`WaypointMode`][skyward_types::WaypointMode] flown |
//! | `healthy` | on exit |
//! | `clouds` | on exit, sensor clouds fused this cycle |
//! | `stale_sensors` | on exit, sensors silent past the critical timeout |
//!
//! # Example
//!
//! ```rust,no_run
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = skyward_runtime::telemetry::init_tracing("skyward");
//! ```

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use skyward_types::PlannerOutput;
use tracing::{Span, field, info_span};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Value of the `skyward.component` resource attribute.
pub const COMPONENT: &str = "local_planner";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Console line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Subscriber settings, normally read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_filter: String,
    pub format: LogFormat,
    /// Spans are exported only when an endpoint is configured.
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub fn from_env(service_name: &str) -> Self {
        Self::from_lookup(service_name, |key| std::env::var(key).ok())
    }

    /// Build the settings from any key lookup. Empty values count as unset.
    pub fn from_lookup(service_name: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let format = match get("SKYWARD_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        Self {
            service_name: service_name.to_string(),
            log_filter: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            format,
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Initialise the global `tracing` subscriber from the environment.
///
/// The returned [`TracerProviderGuard`] **must** be held for the lifetime of
/// the process; dropping it flushes pending spans.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    init_with(&TelemetryConfig::from_env(service_name))
}

/// Initialise the global `tracing` subscriber from explicit settings.
///
/// A second initialisation keeps the first subscriber and only reports the
/// conflict on stderr.
pub fn init_with(config: &TelemetryConfig) -> TracerProviderGuard {
    let env_filter =
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = config
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_provider(&config.service_name, endpoint));

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("skyward-runtime")));
    let json_layer = (config.format == LogFormat::Json)
        .then(|| tracing_subscriber::fmt::layer().json().with_current_span(true));
    let compact_layer =
        (config.format == LogFormat::Compact).then(|| tracing_subscriber::fmt::layer().compact());

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
    {
        eprintln!("[skyward] tracing already initialised: {e}");
    }

    TracerProviderGuard(provider)
}

/// Open the span of one planning cycle. The outcome fields start empty and
/// are filled by [`record_cycle`].
pub fn cycle_span(cycle: u64) -> Span {
    info_span!(
        "planning_cycle",
        cycle,
        mode = field::Empty,
        healthy = field::Empty,
        clouds = field::Empty,
        stale_sensors = field::Empty,
    )
}

/// Record the outcome of a cycle on its span.
pub fn record_cycle(span: &Span, output: &PlannerOutput, clouds: usize, stale_sensors: usize) {
    span.record("mode", field::display(output.mode));
    span.record("healthy", output.healthy);
    span.record("clouds", clouds);
    span.record("stale_sensors", stale_sensors);
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending
/// spans. Hold it in `main` for the whole run.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[skyward] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Attributes identifying this planner process.
fn resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attributes([
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("skyward.component", COMPONENT),
        ])
        .build()
}

/// `None` when the exporter cannot be built; the error goes to stderr and
/// logging continues without export.
fn build_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[skyward] OTLP exporter init failed: {e}"))
        .ok()?;

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource(service_name))
            // One span per cycle and no async runtime, so export synchronously.
            .with_simple_exporter(exporter)
            .build(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
