//! Health report file shared between `stickerbot run` and `stickerbot health`.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    anyhow::{Context, Result},
    clap::Args,
    stickerbot_config::StickerbotConfig,
    stickerbot_metrics::{HealthReport, HealthStatus},
};

/// Written by the running bot on every report tick, in the temp dir.
pub const HEALTH_FILE: &str = "stickerbot-health.json";

/// Prometheus text exposition, written next to the health file.
pub const PROMETHEUS_FILE: &str = "stickerbot.prom";

#[derive(Args)]
pub struct HealthArgs {
    /// Print the raw JSON report.
    #[arg(long)]
    json: bool,

    /// Treat reports older than this many seconds as stale.
    #[arg(long, default_value_t = 180)]
    max_age_secs: u64,
}

#[must_use]
pub fn report_path(config: &StickerbotConfig) -> PathBuf {
    config.temp_dir().join(HEALTH_FILE)
}

/// Replace the file at `path` with `contents` in one rename.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = path.with_extension("tmp");
    tokio::fs::write(&staging, contents)
        .await
        .with_context(|| format!("failed to write {}", staging.display()))?;
    tokio::fs::rename(&staging, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub async fn write_report(path: &Path, report: &HealthReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report)?;
    write_atomic(path, &json).await
}

pub fn read_report(path: &Path) -> Result<HealthReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("no health report at {}; is the bot running?", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("malformed health report {}", path.display()))
}

/// Age of `report` relative to `now`.
fn report_age(report: &HealthReport, now: SystemTime) -> Duration {
    let written = UNIX_EPOCH + Duration::from_millis(report.metrics.timestamp);
    now.duration_since(written).unwrap_or_default()
}

pub fn handle_health(args: HealthArgs, config: &StickerbotConfig) -> Result<()> {
    let path = report_path(config);
    let report = read_report(&path)?;
    let age = report_age(&report, SystemTime::now());
    let stale = age > Duration::from_secs(args.max_age_secs);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let m = &report.metrics;
        println!("Status:          {}", if stale { "stale" } else { report.status.as_str() });
        println!("Uptime:          {}s", report.uptime_secs);
        println!("Report age:      {}s", age.as_secs());
        println!(
            "Processed:       {} ({} ok, {} failed)",
            m.total_processed, m.success_count, m.failure_count
        );
        println!("Failure rate:    {:.1}%", report.failure_rate * 100.0);
        println!("Active:          {}", m.active_processes);
        println!("Per minute:      {}", m.stickers_per_minute);
        println!("Average time:    {:.0} ms", m.average_processing_time_ms);
    }

    if stale || report.status == HealthStatus::Unhealthy {
        std::process::exit(1);
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, stickerbot_metrics::MetricsSnapshot};

    fn report(timestamp: u64, total: u64, failures: u64) -> HealthReport {
        HealthReport::new(
            MetricsSnapshot {
                timestamp,
                total_processed: total,
                success_count: total - failures,
                failure_count: failures,
                ..Default::default()
            },
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn report_survives_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(HEALTH_FILE);
        write_report(&path, &report(1_000, 10, 6)).await.unwrap();

        let read = read_report(&path).unwrap();
        assert_eq!(read.status, HealthStatus::Unhealthy);
        assert_eq!(read.uptime_secs, 30);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn missing_report_mentions_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_report(&dir.path().join(HEALTH_FILE)).unwrap_err();
        assert!(err.to_string().contains(HEALTH_FILE));
    }

    #[test]
    fn age_is_measured_from_the_snapshot() {
        let now = UNIX_EPOCH + Duration::from_secs(100);
        assert_eq!(report_age(&report(40_000, 0, 0), now), Duration::from_secs(60));
        // Clock skew never yields a negative age.
        assert_eq!(report_age(&report(200_000, 0, 0), now), Duration::ZERO);
    }
}
