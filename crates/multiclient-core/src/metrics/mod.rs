//! # Metrics
//!
//! Prometheus metrics recorded through the `metrics` facade. Every record call is a
//! lock-free counter, gauge or histogram update, so the dispatcher and monitor call them
//! inline on their hot paths.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `multiclient_dispatch_total` | counter | `mode`, `outcome` |
//! | `multiclient_dispatch_duration_seconds` | histogram | `mode` |
//! | `multiclient_call_attempts_total` | counter | `engine`, `outcome` |
//! | `multiclient_call_duration_seconds` | histogram | `engine` |
//! | `multiclient_engine_health` | gauge | `engine` |
//! | `multiclient_engine_in_flight` | gauge | `engine` |
//! | `multiclient_engine_height` | gauge | `engine` |
//! | `multiclient_health_transitions_total` | counter | `engine`, `from`, `to` |
//! | `multiclient_probe_total` | counter | `engine`, `outcome` |
//! | `multiclient_pool_engines` | gauge | |

use crate::engine::health::HealthState;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{sync::OnceLock, time::Duration};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "global recorder already installed, metrics rendered from a detached recorder"
                );
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Records engine metrics and renders them in Prometheus text format.
///
/// Engine names are used as label values; keep them generic if `/metrics` is exposed
/// outside the internal network.
#[derive(Clone)]
pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
}

impl MetricsCollector {
    /// Installs the global Prometheus recorder on first use.
    #[must_use]
    pub fn new() -> Self {
        Self { prometheus_handle: init_prometheus_recorder() }
    }

    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }

    pub fn record_dispatch(&self, mode: &'static str, outcome: &'static str, elapsed: Duration) {
        counter!("multiclient_dispatch_total", "mode" => mode, "outcome" => outcome).increment(1);
        histogram!("multiclient_dispatch_duration_seconds", "mode" => mode)
            .record(elapsed.as_secs_f64());
    }

    pub fn record_call_attempt(&self, engine: &str, outcome: &'static str, elapsed: Duration) {
        counter!(
            "multiclient_call_attempts_total",
            "engine" => engine.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("multiclient_call_duration_seconds", "engine" => engine.to_string())
            .record(elapsed.as_secs_f64());
    }

    pub fn record_in_flight(&self, engine: &str, in_flight: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("multiclient_engine_in_flight", "engine" => engine.to_string())
            .set(in_flight as f64);
    }

    pub fn record_probe(&self, engine: &str, success: bool, height: Option<u64>) {
        let outcome = if success { "success" } else { "failure" };
        counter!("multiclient_probe_total", "engine" => engine.to_string(), "outcome" => outcome)
            .increment(1);

        if let Some(height) = height {
            #[allow(clippy::cast_precision_loss)]
            gauge!("multiclient_engine_height", "engine" => engine.to_string()).set(height as f64);
        }
    }

    pub fn record_health(&self, engine: &str, state: HealthState) {
        gauge!("multiclient_engine_health", "engine" => engine.to_string())
            .set(state.gauge_value());
    }

    pub fn record_health_transition(&self, engine: &str, from: HealthState, to: HealthState) {
        counter!(
            "multiclient_health_transitions_total",
            "engine" => engine.to_string(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        self.record_health(engine, to);
    }

    pub fn record_pool_size(&self, engines: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("multiclient_pool_engines").set(engines as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
