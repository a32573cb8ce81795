//! Metrics recorder initialization.

use {anyhow::Result, tracing::info};

/// Handle to the installed recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format.
    ///
    /// Empty when the exporter is disabled or not compiled in.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle
                .as_ref()
                .map(metrics_exporter_prometheus::PrometheusHandle::render)
                .unwrap_or_default()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    /// Install the Prometheus exporter
    pub enabled: bool,
    /// Global labels to add to all metrics (e.g. `environment`)
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system.
///
/// Call once at startup. Without the `prometheus` feature, or when disabled,
/// the `metrics` facade stays on its no-op recorder.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("metrics export is disabled");
        return Ok(MetricsHandle {
            #[cfg(feature = "prometheus")]
            prometheus_handle: None,
        });
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = init_prometheus(config)?;
        info!("Prometheus metrics exporter initialized");
        Ok(MetricsHandle {
            prometheus_handle: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        let _ = config;
        info!("metrics export requested but the prometheus feature is not compiled in");
        Ok(MetricsHandle {})
    }
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use {
        crate::buckets,
        metrics_exporter_prometheus::{Matcher, PrometheusBuilder},
    };

    let mut builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            &buckets::PROCESSING_DURATION,
        )?
        .set_buckets_for_metric(
            Matcher::Full(crate::stickers::OUTPUT_BYTES.to_string()),
            &buckets::OUTPUT_SIZE,
        )?;

    for (key, value) in config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    // Installs globally without spawning an HTTP listener; the handle renders.
    Ok(builder.install_recorder()?)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_renders_nothing() {
        let handle = init_metrics(MetricsRecorderConfig::default()).unwrap();
        assert!(handle.render().is_empty());
    }
}
