//! Process-wide observability setup: tracing subscriber and the Prometheus
//! metrics exporter. Both are idempotent so embedders and tests can call
//! them freely.

use crate::AgentError;
use once_cell::sync::OnceCell;
use sip_agent_config::ObservabilityConfig;
use sip_agent_core::observability;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

static TRACING: OnceCell<()> = OnceCell::new();
static METRICS: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level; output is JSON when `log_json` is set.
pub fn init_tracing(config: &ObservabilityConfig) {
    TRACING.get_or_init(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("sip_agent={}", config.log_level).into());

        let fmt_layer = if config.log_json {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    });
}

/// Start the Prometheus exporter on `metrics_port` and register metric
/// descriptions. Does nothing when metrics are disabled.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<(), AgentError> {
    if !config.metrics_enabled {
        return Ok(());
    }
    METRICS.get_or_try_init(|| {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics_port))
            .install()
            .map_err(|e| AgentError::Observability(e.to_string()))?;
        observability::describe_metrics();
        tracing::info!(port = config.metrics_port, "Prometheus exporter listening");
        Ok::<(), AgentError>(())
    })?;
    Ok(())
}
