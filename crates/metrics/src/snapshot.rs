//! Point-in-time processing statistics and the derived health verdict.

use {
    serde::{Deserialize, Serialize},
    std::time::Duration,
};

/// Aggregate processing counters at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Unix millis when the snapshot was taken
    pub timestamp: u64,
    pub total_processed: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub active_processes: u64,
    /// Successful stickers in the last completed minute
    pub stickers_per_minute: u64,
    /// Mean over the last 100 completed jobs, in milliseconds
    pub average_processing_time_ms: f64,
}

impl MetricsSnapshot {
    /// Failed share of processed jobs, 0.0 when nothing ran yet.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.total_processed == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_processed as f64
    }

    #[must_use]
    pub fn health(&self) -> HealthStatus {
        let rate = self.failure_rate();
        if self.failure_count == 0 || rate <= 0.2 {
            HealthStatus::Healthy
        } else if rate > 0.5 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health verdict plus the numbers it was derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub failure_rate: f64,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    #[must_use]
    pub fn new(metrics: MetricsSnapshot, uptime: Duration) -> Self {
        Self {
            status: metrics.health(),
            uptime_secs: uptime.as_secs(),
            failure_rate: metrics.failure_rate(),
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(total: u64, failures: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            total_processed: total,
            success_count: total - failures,
            failure_count: failures,
            ..Default::default()
        }
    }

    #[test]
    fn health_thresholds() {
        assert_eq!(snapshot(0, 0).health(), HealthStatus::Healthy);
        assert_eq!(snapshot(10, 2).health(), HealthStatus::Healthy);
        assert_eq!(snapshot(10, 3).health(), HealthStatus::Degraded);
        assert_eq!(snapshot(10, 5).health(), HealthStatus::Degraded);
        assert_eq!(snapshot(10, 6).health(), HealthStatus::Unhealthy);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let json = serde_json::to_value(snapshot(4, 1)).unwrap_or_default();
        assert_eq!(json["totalProcessed"], 4);
        assert_eq!(json["failureCount"], 1);
        assert!(json.get("averageProcessingTimeMs").is_some());
    }

    #[test]
    fn report_carries_uptime() {
        let report = HealthReport::new(snapshot(1, 0), Duration::from_secs(90));
        assert_eq!(report.uptime_secs, 90);
        assert_eq!(report.status, HealthStatus::Healthy);
    }
}
