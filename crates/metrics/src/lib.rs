//! Processing metrics for the sticker pipeline.
//!
//! [`MetricsAggregator`] keeps the in-process counters (totals, failures,
//! active jobs, stickers per minute, moving average duration) and publishes
//! snapshots. The same events go through the `metrics` crate facade; with the
//! `prometheus` feature they are exported in Prometheus text format.
//!
//! # Features
//!
//! - `prometheus`: install the Prometheus recorder in [`init_metrics`]

mod aggregator;
mod definitions;
mod recorder;
mod snapshot;

pub use {
    aggregator::{DURATION_WINDOW, MetricsAggregator},
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
    snapshot::{HealthReport, HealthStatus, MetricsSnapshot},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
