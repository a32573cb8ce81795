//! `stickerbot run`: wire the transport, the pipeline and the engine, then
//! serve until ctrl-c or a fatal error.

use std::{sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    stickerbot_config::{Severity, StickerbotConfig, check_config},
    stickerbot_media::{
        ConversionEngine, ConversionOptions, TextRenderer, Transcoder, TranscoderSettings, text,
    },
    stickerbot_metrics::{MetricsAggregator, MetricsHandle, MetricsRecorderConfig, init_metrics},
    stickerbot_pipeline::{FatalReceiver, Pipeline, PipelineSettings},
    stickerbot_whatsapp::{SidecarConfig, WhatsAppTransport, find_sidecar_dir},
    tokio::{
        sync::{broadcast::error::RecvError, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use crate::health_commands::{PROMETHEUS_FILE, report_path, write_atomic, write_report};

/// Transport events buffered before the sidecar reader waits.
const EVENT_BUFFER: usize = 256;

/// Length of the stickers-per-minute bucket.
const MINUTE: Duration = Duration::from_secs(60);

#[must_use]
pub fn default_options(config: &StickerbotConfig) -> ConversionOptions {
    ConversionOptions {
        quality: config.sticker.quality,
        size: config.sticker.size,
    }
}

/// Conversion engine from config. Missing fonts or ffmpeg only disable the
/// variants that need them.
#[must_use]
pub fn build_engine(config: &StickerbotConfig) -> ConversionEngine {
    let renderer = match text::load_font(config.text.font_path.as_deref()) {
        Ok(font) => Some(TextRenderer::new(
            font,
            config.text.font_size,
            config.text.min_font_size,
        )),
        Err(e) => {
            warn!(error = %e, "text stickers disabled");
            None
        },
    };

    let transcoder = Transcoder::new(TranscoderSettings {
        binary: config.transcoder.binary.clone(),
        timeout: Duration::from_secs(config.transcoder.timeout_secs),
        threads: config.transcoder.threads,
        temp_dir: config.temp_dir(),
    });
    if !transcoder.is_available() {
        warn!(
            binary = %config.transcoder.binary,
            "transcoder not found, animated stickers will fail"
        );
    }

    ConversionEngine::new(config.sticker.lossless, renderer, transcoder)
}

fn check_startup_config(config: &StickerbotConfig) -> Result<()> {
    let mut errors = 0;
    for d in check_config(config) {
        match d.severity {
            Severity::Error => {
                errors += 1;
                error!(path = %d.path, "{}", d.message);
            },
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
            Severity::Info => debug!(path = %d.path, "{}", d.message),
        }
    }
    if errors > 0 {
        bail!("invalid configuration ({errors} error(s)); run `stickerbot config check`");
    }
    Ok(())
}

/// Log snapshots as they are pushed and write the health report (and the
/// Prometheus exposition, when enabled) every `period`.
fn spawn_reporter(
    aggregator: Arc<MetricsAggregator>,
    config: &StickerbotConfig,
    exporter: MetricsHandle,
    period: Duration,
) -> JoinHandle<()> {
    let health_path = report_path(config);
    let prometheus_path = config
        .metrics
        .prometheus
        .then(|| config.temp_dir().join(PROMETHEUS_FILE));
    let mut snapshots = aggregator.subscribe();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = aggregator.health();
                    let m = &report.metrics;
                    info!(
                        status = %report.status,
                        uptime_secs = report.uptime_secs,
                        total = m.total_processed,
                        succeeded = m.success_count,
                        failed = m.failure_count,
                        active = m.active_processes,
                        per_minute = m.stickers_per_minute,
                        avg_ms = m.average_processing_time_ms,
                        "usage metrics"
                    );
                    if let Err(e) = write_report(&health_path, &report).await {
                        warn!(error = %e, "failed to write health report");
                    }
                    if let Some(path) = &prometheus_path
                        && let Err(e) = write_atomic(path, exporter.render().as_bytes()).await
                    {
                        warn!(error = %e, "failed to write prometheus metrics");
                    }
                },
                snapshot = snapshots.recv() => match snapshot {
                    Ok(s) => debug!(
                        total = s.total_processed,
                        active = s.active_processes,
                        avg_ms = s.average_processing_time_ms,
                        "metrics updated"
                    ),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "metrics reporter lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

pub async fn run(config: StickerbotConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "stickerbot starting"
    );
    check_startup_config(&config)?;

    let exporter = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled && config.metrics.prometheus,
        global_labels: vec![("environment".into(), config.environment.to_string())],
    })?;

    let engine = Arc::new(build_engine(&config));
    let aggregator = Arc::new(MetricsAggregator::new());
    let ticker = aggregator.spawn_ticker(MINUTE);
    let reporter = config.metrics.enabled.then(|| {
        spawn_reporter(
            Arc::clone(&aggregator),
            &config,
            exporter,
            Duration::from_secs(config.metrics.report_interval_secs.max(1)),
        )
    });

    let sidecar_dir = find_sidecar_dir(config.whatsapp.sidecar_dir.as_deref())?;
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let transport = WhatsAppTransport::spawn(
        &SidecarConfig {
            sidecar_dir,
            node: config.whatsapp.node.clone(),
            auth_dir: config.whatsapp.auth_dir.clone(),
        },
        Duration::from_secs(config.whatsapp.request_timeout_secs),
        events_tx,
    )
    .await
    .context("failed to start the WhatsApp sidecar")?;

    let (fatal_tx, mut fatal_rx): (_, FatalReceiver) = mpsc::unbounded_channel();
    let settings = PipelineSettings::from_config(&config);
    info!(
        concurrency = settings.concurrency,
        max_requests = settings.max_requests,
        window_ms = settings.rate_window.as_millis() as u64,
        "pipeline ready"
    );
    let pipeline = Pipeline::build(
        settings,
        transport.clone(),
        engine,
        Arc::clone(&aggregator),
        Some(fatal_tx),
    );
    let mut dispatch = tokio::spawn(pipeline.dispatcher().run(events_rx));

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        },
        Some(err) = fatal_rx.recv() => {
            error!(code = %err.code(), error = %err, "fatal error, shutting down");
            Err(anyhow::Error::new(err).context("unrecoverable error while handling a message"))
        },
        joined = &mut dispatch => match joined {
            Ok(()) => Err(anyhow::anyhow!("WhatsApp transport closed unexpectedly")),
            Err(e) => Err(anyhow::Error::new(e).context("dispatcher task failed")),
        },
    };

    // Stop taking messages, let running jobs send their stickers, then close
    // the sidecar.
    dispatch.abort();
    pipeline.shutdown().await;
    transport.shutdown().await;
    ticker.abort();
    if let Some(reporter) = reporter {
        reporter.abort();
    }

    let report = aggregator.health();
    info!(
        status = %report.status,
        total = report.metrics.total_processed,
        failed = report.metrics.failure_count,
        uptime_secs = report.uptime_secs,
        "stickerbot stopped"
    );
    outcome
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_sticker_config() {
        let mut config = StickerbotConfig::default();
        config.sticker.size = 256;
        config.sticker.quality = 60;
        assert_eq!(default_options(&config), ConversionOptions {
            quality: 60,
            size: 256,
        });
    }

    #[test]
    fn out_of_range_config_aborts_startup() {
        let mut config = StickerbotConfig::default();
        assert!(check_startup_config(&config).is_ok());
        config.scheduler.concurrency = 0;
        assert!(check_startup_config(&config).is_err());
    }

    #[test]
    fn missing_font_only_disables_text() {
        let mut config = StickerbotConfig::default();
        config.text.font_path = Some("/nonexistent/font.ttf".into());
        assert!(!build_engine(&config).supports_text());
    }
}
