/*!
Observability infrastructure for hydrate.

This module provides:
- Structured logging and tracing setup
- Prometheus counters for hydration lifecycle events (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use crate::events::{EventSink, HydrationEvent};
#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{HydrateError, Result};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<HydrationMetrics> = OnceLock::new();

/// Metrics collection for hydration operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct HydrationMetrics {
    /// Lifecycle events by operation and kind
    pub events_total: IntCounterVec,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl HydrationMetrics {
    /// Initialize new metrics instance
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            Opts::new(
                "hydrate_events_total",
                "Hydration lifecycle events by operation and kind",
            ),
            &["operation", "kind"],
        )
        .map_err(|e| {
            HydrateError::storage(format!("Failed to create events_total metric: {e}"))
        })?;

        registry
            .register(Box::new(events_total.clone()))
            .map_err(|e| HydrateError::storage(format!("Failed to register events_total: {e}")))?;

        Ok(Self {
            events_total,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    pub fn global() -> &'static HydrationMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize hydrate metrics"))
    }

    /// Record one lifecycle event
    pub fn record_event(&self, event: &HydrationEvent) {
        let operation = event.operation.to_string();
        let kind = event.kind.to_string();
        self.events_total
            .with_label_values(&[operation.as_str(), kind.as_str()])
            .inc();
    }

    /// Count of events recorded for an operation and kind
    pub fn event_count(&self, operation: &str, kind: &str) -> u64 {
        self.events_total
            .with_label_values(&[operation, kind])
            .get()
    }

    /// Gather metrics in Prometheus format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| HydrateError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| HydrateError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Event sink that counts lifecycle events in [`HydrationMetrics`]
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy)]
pub struct MetricsEventSink {
    metrics: &'static HydrationMetrics,
}

#[cfg(feature = "metrics")]
impl MetricsEventSink {
    /// Sink recording into the global metrics instance
    pub fn global() -> Self {
        Self {
            metrics: HydrationMetrics::global(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for MetricsEventSink {
    fn default() -> Self {
        Self::global()
    }
}

#[cfg(feature = "metrics")]
impl EventSink for MetricsEventSink {
    fn emit(&self, event: &HydrationEvent) {
        self.metrics.record_event(event);
    }
}

/// Initialize the global logging subscriber
///
/// Honors `RUST_LOG`, defaulting to `hydrate_core=info`. With `json` set, log
/// lines are emitted as JSON objects.
pub fn init_observability(json: bool) -> Result<()> {
    init_observability_with("hydrate_core=info", json)
}

/// Initialize the global logging subscriber with a fallback filter
///
/// `default_filter` applies only when `RUST_LOG` is unset or invalid.
pub fn init_observability_with(default_filter: &str, json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    HydrationMetrics::global();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| HydrateError::invalid_config(format!("Invalid log filter: {e}")))?;

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        HydrateError::invalid_config(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("hydrate observability initialized");
    Ok(())
}
