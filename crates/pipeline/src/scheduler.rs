//! Bounded-concurrency job scheduler.
//!
//! Submission never blocks: jobs go into an unbounded FIFO queue. A single
//! dispatch task takes a worker slot (semaphore permit) first and only then
//! pops the next job, so jobs are released in submission order as slots free
//! up. At most `concurrency` jobs execute at once; completion order among
//! them is unspecified.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    stickerbot_common::{Error, Result},
    stickerbot_metrics::{MetricsAggregator, gauge, stickers},
    tokio::{
        sync::{Semaphore, mpsc, oneshot},
        task::JoinHandle,
    },
    tracing::{Instrument, debug, error, info, info_span, warn},
};

use crate::job::{Job, JobId, JobOutcome, JobStatus};

/// Executes one job inside a worker slot.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> Result<()>;

    /// Report a failed job to its sender. An `Err` return marks the failure
    /// as fatal for the process.
    async fn on_failure(&self, job: &Job, err: Error) -> Result<()>;
}

/// Receiver of fatal errors; the run loop exits when one arrives.
pub type FatalSender = mpsc::UnboundedSender<Error>;
pub type FatalReceiver = mpsc::UnboundedReceiver<Error>;

/// Handle to an admitted job.
pub struct JobHandle {
    id: JobId,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the job to leave its worker slot. `None` if the worker died
    /// without reporting.
    pub async fn outcome(self) -> Option<JobOutcome> {
        self.outcome.await.ok()
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}

struct Queued {
    job: Job,
    enqueued_at: Instant,
    done: oneshot::Sender<JobOutcome>,
}

struct Shared {
    concurrency: usize,
    slots: Arc<Semaphore>,
    runner: Arc<dyn JobRunner>,
    metrics: Arc<MetricsAggregator>,
    fatal: Option<FatalSender>,
    /// Live jobs only; entries are dropped once the outcome is reported.
    statuses: DashMap<JobId, JobStatus>,
    queued: AtomicUsize,
    processing: AtomicUsize,
    peak_processing: AtomicUsize,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    queue: Mutex<Option<mpsc::UnboundedSender<Queued>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the dispatch task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(
        concurrency: usize,
        runner: Arc<dyn JobRunner>,
        metrics: Arc<MetricsAggregator>,
        fatal: Option<FatalSender>,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let shared = Arc::new(Shared {
            concurrency,
            slots: Arc::new(Semaphore::new(concurrency)),
            runner,
            metrics,
            fatal,
            statuses: DashMap::new(),
            queued: AtomicUsize::new(0),
            processing: AtomicUsize::new(0),
            peak_processing: AtomicUsize::new(0),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatch = tokio::spawn(dispatch_loop(Arc::clone(&shared), rx));
        info!(concurrency, "scheduler started");
        Self {
            shared,
            queue: Mutex::new(Some(tx)),
            dispatch: Mutex::new(Some(dispatch)),
        }
    }

    /// Enqueue `job` and return immediately.
    pub fn submit(&self, mut job: Job) -> Result<JobHandle> {
        job.advance(JobStatus::Admitted);
        let id = job.id;
        let variant = job.variant();
        let (done, outcome) = oneshot::channel();

        let queue = lock(&self.queue);
        let Some(tx) = queue.as_ref() else {
            return Err(Error::system("scheduler is shut down"));
        };
        self.shared.statuses.insert(id, JobStatus::Admitted);
        let depth = self.shared.queued.fetch_add(1, Ordering::Relaxed) + 1;
        if tx
            .send(Queued {
                job,
                enqueued_at: Instant::now(),
                done,
            })
            .is_err()
        {
            self.shared.statuses.remove(&id);
            self.shared.queued.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::system("scheduler dispatch task stopped"));
        }
        drop(queue);

        gauge!(stickers::QUEUED).increment(1.0);
        debug!(job_id = %id, %variant, queued = depth, "job admitted");
        Ok(JobHandle { id, outcome })
    }

    /// Stop accepting jobs and wait until every queued and running job has
    /// finished.
    pub async fn shutdown(&self) {
        drop(lock(&self.queue).take());
        let dispatch = lock(&self.dispatch).take();
        if let Some(dispatch) = dispatch
            && let Err(e) = dispatch.await
        {
            warn!(error = %e, "scheduler dispatch task failed");
        }
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.shared.concurrency
    }

    /// Jobs waiting for a worker slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::Relaxed)
    }

    /// Jobs currently executing.
    #[must_use]
    pub fn processing(&self) -> usize {
        self.shared.processing.load(Ordering::Relaxed)
    }

    /// Highest number of simultaneously executing jobs seen so far.
    #[must_use]
    pub fn peak_processing(&self) -> usize {
        self.shared.peak_processing.load(Ordering::Relaxed)
    }

    /// Status of a live job; `None` once its outcome was reported.
    #[must_use]
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.shared.statuses.get(&id).map(|s| *s)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn dispatch_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Queued>) {
    loop {
        let Ok(permit) = Arc::clone(&shared.slots).acquire_owned().await else {
            break;
        };
        let Some(queued) = rx.recv().await else {
            break;
        };
        let worker = Arc::clone(&shared);
        tokio::spawn(async move {
            worker.execute(queued).await;
            drop(permit);
        });
    }

    // Every running worker holds a permit until it is done.
    let all = u32::try_from(shared.concurrency).unwrap_or(u32::MAX);
    if shared.slots.acquire_many(all).await.is_ok() {
        debug!("scheduler drained");
    }
}

impl Shared {
    async fn execute(&self, queued: Queued) {
        let Queued {
            mut job,
            enqueued_at,
            done,
        } = queued;
        let waited = enqueued_at.elapsed();
        self.queued.fetch_sub(1, Ordering::Relaxed);
        gauge!(stickers::QUEUED).decrement(1.0);

        job.advance(JobStatus::Processing);
        self.statuses.insert(job.id, JobStatus::Processing);
        let span = info_span!("job", job_id = %job.id, variant = %job.variant());

        let slot = ActiveSlot::enter(self);
        let result = self.runner.run(&job).instrument(span.clone()).await;
        let duration = slot.finish(result.is_ok());

        let error = match result {
            Ok(()) => {
                job.advance(JobStatus::Completed);
                span.in_scope(|| {
                    info!(
                        duration_ms = duration.as_millis() as u64,
                        waited_ms = waited.as_millis() as u64,
                        "job completed"
                    );
                });
                None
            },
            Err(err) => {
                job.advance(JobStatus::Failed);
                let code = err.code();
                if let Err(fatal) = self.runner.on_failure(&job, err).instrument(span).await {
                    self.raise_fatal(fatal);
                }
                Some(code)
            },
        };

        self.statuses.remove(&job.id);
        let _ = done.send(JobOutcome {
            id: job.id,
            variant: job.variant(),
            status: job.status,
            duration,
            waited,
            error,
        });
    }

    fn raise_fatal(&self, err: Error) {
        error!(error = %err, code = %err.code(), "fatal error in job worker");
        if let Some(fatal) = &self.fatal {
            let _ = fatal.send(err);
        }
    }
}

/// Occupancy of one worker slot. Metrics are closed out on drop too, so an
/// aborted or panicking job still leaves the counters balanced.
struct ActiveSlot<'a> {
    shared: &'a Shared,
    started: Instant,
    finished: bool,
}

impl<'a> ActiveSlot<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let now = shared.processing.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_processing.fetch_max(now, Ordering::SeqCst);
        shared.metrics.on_start();
        Self {
            shared,
            started: Instant::now(),
            finished: false,
        }
    }

    fn finish(mut self, success: bool) -> Duration {
        self.finished = true;
        let duration = self.started.elapsed();
        self.shared.metrics.on_end(duration, success);
        duration
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.shared.processing.fetch_sub(1, Ordering::SeqCst);
        if !self.finished {
            self.shared.metrics.on_end(self.started.elapsed(), false);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        stickerbot_common::{InboundMessage, MediaPayload},
        stickerbot_media::{ConversionOptions, StickerSource},
    };

    /// Sleeps, tracks concurrency and fails jobs whose text is "fail".
    #[derive(Default)]
    struct SlowRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
        order: Mutex<Vec<String>>,
        failures: AtomicUsize,
        fatal_on_failure: bool,
    }

    #[async_trait]
    impl JobRunner for SlowRunner {
        async fn run(&self, job: &Job) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let label = match &job.source {
                StickerSource::Text(t) => t.clone(),
                _ => String::new(),
            };
            lock(&self.order).push(label.clone());
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if label == "fail" {
                return Err(Error::sticker_failed("boom"));
            }
            Ok(())
        }

        async fn on_failure(&self, _job: &Job, err: Error) -> Result<()> {
            self.failures.fetch_add(1, Ordering::SeqCst);
            if self.fatal_on_failure {
                return Err(Error::system(err.to_string()));
            }
            Ok(())
        }
    }

    fn text_job(text: &str) -> Job {
        Job::new(
            StickerSource::Text(text.into()),
            ConversionOptions::default(),
            InboundMessage::default(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_concurrency() {
        let runner = Arc::new(SlowRunner::default());
        let metrics = Arc::new(MetricsAggregator::new());
        let scheduler = Scheduler::start(3, runner.clone(), metrics.clone(), None);

        let handles: Vec<_> = (0..12)
            .map(|i| scheduler.submit(text_job(&i.to_string())).unwrap())
            .collect();
        for handle in handles {
            assert!(handle.outcome().await.unwrap().succeeded());
        }

        assert!(runner.peak.load(Ordering::SeqCst) <= 3);
        assert!(scheduler.peak_processing() <= 3);
        assert_eq!(scheduler.processing(), 0);
        assert_eq!(scheduler.queued(), 0);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_processed, 12);
        assert_eq!(snapshot.success_count, 12);
        assert_eq!(snapshot.active_processes, 0);
    }

    #[tokio::test]
    async fn single_slot_runs_in_submission_order() {
        let runner = Arc::new(SlowRunner::default());
        let scheduler = Scheduler::start(
            1,
            runner.clone(),
            Arc::new(MetricsAggregator::new()),
            None,
        );
        let handles: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|t| scheduler.submit(text_job(t)).unwrap())
            .collect();
        for handle in handles {
            handle.outcome().await.unwrap();
        }
        assert_eq!(*lock(&runner.order), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn failures_are_isolated_and_reported() {
        let runner = Arc::new(SlowRunner::default());
        let metrics = Arc::new(MetricsAggregator::new());
        let scheduler = Scheduler::start(2, runner.clone(), metrics.clone(), None);

        let bad = scheduler.submit(text_job("fail")).unwrap();
        let good = scheduler.submit(text_job("ok")).unwrap();
        let bad_id = bad.id();

        let bad = bad.outcome().await.unwrap();
        assert_eq!(bad.id, bad_id);
        assert_eq!(bad.status, JobStatus::Failed);
        assert_eq!(
            bad.error,
            Some(stickerbot_common::ErrorCode::StickerCreationFailed)
        );
        assert!(good.outcome().await.unwrap().succeeded());
        assert_eq!(runner.failures.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.status(bad_id), None);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.success_count, 1);
    }

    #[tokio::test]
    async fn fatal_failures_reach_the_sink() {
        let runner = Arc::new(SlowRunner {
            fatal_on_failure: true,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::start(1, runner, Arc::new(MetricsAggregator::new()), Some(tx));
        scheduler
            .submit(text_job("fail"))
            .unwrap()
            .outcome()
            .await
            .unwrap();
        let fatal = rx.recv().await.unwrap();
        assert!(!fatal.is_operational());
    }

    #[tokio::test]
    async fn shutdown_drains_and_rejects_new_jobs() {
        let runner = Arc::new(SlowRunner::default());
        let metrics = Arc::new(MetricsAggregator::new());
        let scheduler = Scheduler::start(2, runner, metrics.clone(), None);
        for i in 0..5 {
            scheduler.submit(text_job(&i.to_string())).unwrap();
        }
        scheduler.shutdown().await;
        assert_eq!(metrics.snapshot().total_processed, 5);
        assert_eq!(scheduler.processing(), 0);

        let err = scheduler
            .submit(Job::new(
                StickerSource::StaticImage(MediaPayload::new("image/png", vec![0])),
                ConversionOptions::default(),
                InboundMessage::default(),
            ))
            .unwrap_err();
        assert!(!err.is_operational());
    }
}
