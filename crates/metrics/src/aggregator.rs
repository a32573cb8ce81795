//! In-process processing statistics.
//!
//! One [`MetricsAggregator`] is built at startup and shared by handle. Every
//! start/end of a job updates the counters, mirrors them to the `metrics`
//! facade and pushes a snapshot to subscribers. A per-minute ticker rolls the
//! sticker-per-minute counter.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use {
    metrics::{counter, gauge, histogram},
    tokio::{sync::broadcast, task::JoinHandle},
    tracing::debug,
};

use crate::{
    definitions::{labels, stickers},
    snapshot::{HealthReport, MetricsSnapshot},
};

/// Completed-job durations kept for the moving average.
pub const DURATION_WINDOW: usize = 100;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct State {
    total_processed: u64,
    success_count: u64,
    failure_count: u64,
    active_processes: u64,
    current_minute: u64,
    stickers_per_minute: u64,
    durations: VecDeque<Duration>,
    average_ms: f64,
}

impl State {
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: unix_millis(),
            total_processed: self.total_processed,
            success_count: self.success_count,
            failure_count: self.failure_count,
            active_processes: self.active_processes,
            stickers_per_minute: self.stickers_per_minute,
            average_processing_time_ms: self.average_ms,
        }
    }

    fn record_duration(&mut self, duration: Duration) {
        if self.durations.len() == DURATION_WINDOW {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
        let total: f64 = self
            .durations
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .sum();
        self.average_ms = total / self.durations.len() as f64;
    }
}

pub struct MetricsAggregator {
    state: Mutex<State>,
    started_at: Instant,
    events: broadcast::Sender<MetricsSnapshot>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            started_at: Instant::now(),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A job entered a worker slot.
    pub fn on_start(&self) {
        let snapshot = {
            let mut state = self.lock();
            state.active_processes += 1;
            state.snapshot()
        };
        gauge!(stickers::ACTIVE_PROCESSES).increment(1.0);
        self.publish(snapshot);
    }

    /// A job left its worker slot, successfully or not.
    pub fn on_end(&self, duration: Duration, success: bool) {
        let snapshot = {
            let mut state = self.lock();
            state.active_processes = state.active_processes.saturating_sub(1);
            state.total_processed += 1;
            state.current_minute += 1;
            if success {
                state.success_count += 1;
            } else {
                state.failure_count += 1;
            }
            state.record_duration(duration);
            state.snapshot()
        };

        let outcome = if success {
            "true"
        } else {
            "false"
        };
        gauge!(stickers::ACTIVE_PROCESSES).decrement(1.0);
        counter!(stickers::PROCESSED_TOTAL, labels::SUCCESS => outcome).increment(1);
        if !success {
            counter!(stickers::FAILURES_TOTAL).increment(1);
        }
        histogram!(stickers::PROCESSING_DURATION_SECONDS).record(duration.as_secs_f64());
        self.publish(snapshot);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock().snapshot()
    }

    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport::new(self.snapshot(), self.started_at.elapsed())
    }

    /// Clear counters and the duration window. Jobs still running stay counted
    /// as active.
    pub fn reset(&self) {
        let snapshot = {
            let mut state = self.lock();
            *state = State {
                active_processes: state.active_processes,
                ..State::default()
            };
            state.snapshot()
        };
        debug!("processing metrics reset");
        self.publish(snapshot);
    }

    /// Close the current minute: the number of jobs that ended in it, failed
    /// ones included, becomes `stickers_per_minute`.
    pub fn rotate_minute(&self) -> MetricsSnapshot {
        let snapshot = {
            let mut state = self.lock();
            state.stickers_per_minute = std::mem::take(&mut state.current_minute);
            state.snapshot()
        };
        self.publish(snapshot.clone());
        snapshot
    }

    /// Live snapshot stream. Slow receivers skip ahead (`Lagged`).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsSnapshot> {
        self.events.subscribe()
    }

    /// Roll the per-minute counter every `period`. The task ends once the
    /// aggregator is dropped.
    #[must_use]
    pub fn spawn_ticker(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(aggregator) = weak.upgrade() else {
                    break;
                };
                aggregator.rotate_minute();
            }
        })
    }

    fn publish(&self, snapshot: MetricsSnapshot) {
        // No subscribers is fine.
        let _ = self.events.send(snapshot);
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_end_update_counters() {
        let agg = MetricsAggregator::new();
        agg.on_start();
        agg.on_start();
        assert_eq!(agg.snapshot().active_processes, 2);

        agg.on_end(Duration::from_millis(100), true);
        agg.on_end(Duration::from_millis(300), false);
        let snap = agg.snapshot();
        assert_eq!(snap.active_processes, 0);
        assert_eq!(snap.total_processed, 2);
        assert_eq!(snap.success_count, 1);
        assert_eq!(snap.failure_count, 1);
        assert!((snap.average_processing_time_ms - 200.0).abs() < 1e-6);
    }

    #[test]
    fn duration_window_evicts_oldest() {
        let agg = MetricsAggregator::new();
        agg.on_end(Duration::from_secs(100), true);
        for _ in 0..DURATION_WINDOW {
            agg.on_end(Duration::from_millis(10), true);
        }
        let snap = agg.snapshot();
        assert_eq!(snap.total_processed, 101);
        assert!((snap.average_processing_time_ms - 10.0).abs() < 1e-6);
    }

    #[test]
    fn minute_rotation_copies_and_resets() {
        let agg = MetricsAggregator::new();
        agg.on_end(Duration::from_millis(5), true);
        agg.on_end(Duration::from_millis(5), true);
        agg.on_end(Duration::from_millis(5), false);
        assert_eq!(agg.rotate_minute().stickers_per_minute, 3);
        assert_eq!(agg.rotate_minute().stickers_per_minute, 0);
    }

    #[test]
    fn failed_jobs_count_toward_the_minute() {
        let agg = MetricsAggregator::new();
        agg.on_end(Duration::from_millis(5), true);
        agg.on_end(Duration::from_millis(5), false);
        let snap = agg.rotate_minute();
        assert_eq!(snap.stickers_per_minute, 2);
        assert_eq!(snap.failure_count, 1);
    }

    #[test]
    fn reset_keeps_active_processes() {
        let agg = MetricsAggregator::new();
        agg.on_start();
        agg.on_start();
        agg.on_end(Duration::from_millis(5), false);
        agg.reset();
        let snap = agg.snapshot();
        assert_eq!(snap.active_processes, 1);
        assert_eq!(snap.total_processed, 0);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.average_processing_time_ms, 0.0);
    }

    #[test]
    fn end_without_start_does_not_underflow() {
        let agg = MetricsAggregator::new();
        agg.on_end(Duration::from_millis(1), true);
        assert_eq!(agg.snapshot().active_processes, 0);
    }

    #[tokio::test]
    async fn subscribers_see_every_transition() {
        let agg = MetricsAggregator::new();
        let mut rx = agg.subscribe();
        agg.on_start();
        agg.on_end(Duration::from_millis(1), true);

        assert_eq!(rx.recv().await.unwrap().active_processes, 1);
        let done = rx.recv().await.unwrap();
        assert_eq!(done.active_processes, 0);
        assert_eq!(done.success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_rolls_the_minute() {
        let agg = Arc::new(MetricsAggregator::new());
        let mut rx = agg.subscribe();
        let ticker = agg.spawn_ticker(Duration::from_secs(60));
        agg.on_end(Duration::from_millis(1), true);
        let _ = rx.recv().await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let rolled = rx.recv().await.unwrap();
        assert_eq!(rolled.stickers_per_minute, 1);
        ticker.abort();
    }

    #[test]
    fn health_reflects_failure_rate() {
        let agg = MetricsAggregator::new();
        for ok in [true, false, false] {
            agg.on_end(Duration::from_millis(1), ok);
        }
        assert_eq!(agg.health().status, crate::HealthStatus::Unhealthy);
    }
}
