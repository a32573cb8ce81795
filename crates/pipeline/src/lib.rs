//! Message handling pipeline for the sticker bot.
//!
//! Inbound messages are classified by the [`Dispatcher`], pass the
//! [`MiddlewareChain`] (error handler, logging, [`RateLimiter`],
//! [`Validator`]) and become [`Job`]s on the bounded [`Scheduler`]. Workers
//! run the conversion and send the sticker; failures go back through the
//! same [`ErrorHandler`].

pub mod context;
pub mod dispatcher;
pub mod error_handler;
pub mod job;
pub mod logging;
pub mod middleware;
pub mod rate_limit;
pub mod router;
pub mod runner;
pub mod scheduler;
pub mod validator;

use std::{sync::Arc, time::Duration};

use {
    stickerbot_channels::ChatTransport,
    stickerbot_common::StickerMetadata,
    stickerbot_config::StickerbotConfig,
    stickerbot_media::{ConversionEngine, ConversionOptions},
    stickerbot_metrics::MetricsAggregator,
};

pub use {
    context::{Command, MessageContext},
    dispatcher::{AdmissionHandler, Dispatch, Dispatcher},
    error_handler::ErrorHandler,
    job::{Job, JobId, JobOutcome, JobStatus},
    logging::LoggingMiddleware,
    middleware::{Handler, Middleware, MiddlewareChain, Next},
    rate_limit::RateLimiter,
    runner::StickerJobRunner,
    scheduler::{FatalReceiver, FatalSender, JobHandle, JobRunner, Scheduler},
    validator::{ValidationLimits, Validator},
};

/// Runtime knobs of the pipeline, usually taken from the config file.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub rate_window: Duration,
    pub max_requests: u32,
    pub limits: ValidationLimits,
    pub defaults: ConversionOptions,
    pub metadata: StickerMetadata,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            rate_window: Duration::from_millis(60_000),
            max_requests: 10,
            limits: ValidationLimits::default(),
            defaults: ConversionOptions::default(),
            metadata: StickerMetadata::default(),
        }
    }
}

impl PipelineSettings {
    #[must_use]
    pub fn from_config(config: &StickerbotConfig) -> Self {
        Self {
            concurrency: config.scheduler.concurrency,
            rate_window: Duration::from_millis(config.rate_limit.window_ms),
            max_requests: config.max_requests(),
            limits: ValidationLimits::from(&config.limits),
            defaults: ConversionOptions {
                quality: config.sticker.quality,
                size: config.sticker.size,
            },
            metadata: StickerMetadata {
                name: config.sticker.name.clone(),
                author: config.sticker.author.clone(),
            },
        }
    }
}

/// The wired pipeline: dispatcher in front, scheduler behind.
pub struct Pipeline {
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    rate_limiter: Arc<RateLimiter>,
}

impl Pipeline {
    /// Wire the standard chain with a [`StickerJobRunner`] over `engine`.
    #[must_use]
    pub fn build(
        settings: PipelineSettings,
        transport: Arc<dyn ChatTransport>,
        engine: Arc<ConversionEngine>,
        metrics: Arc<MetricsAggregator>,
        fatal: Option<FatalSender>,
    ) -> Self {
        let metadata = settings.metadata.clone();
        let runner_transport = Arc::clone(&transport);
        Self::with_runner(settings, transport, metrics, fatal, move |errors| {
            Arc::new(StickerJobRunner::new(
                engine,
                runner_transport,
                metadata,
                errors,
            ))
        })
    }

    /// Wire the standard chain around a custom job runner. `make_runner`
    /// receives the error handler so failed jobs are answered the same way
    /// as rejected messages.
    #[must_use]
    pub fn with_runner<F>(
        settings: PipelineSettings,
        transport: Arc<dyn ChatTransport>,
        metrics: Arc<MetricsAggregator>,
        fatal: Option<FatalSender>,
        make_runner: F,
    ) -> Self
    where
        F: FnOnce(Arc<ErrorHandler>) -> Arc<dyn JobRunner>,
    {
        let errors = Arc::new(ErrorHandler::new(Arc::clone(&transport)));
        let runner = make_runner(Arc::clone(&errors));
        let scheduler = Arc::new(Scheduler::start(
            settings.concurrency,
            runner,
            metrics,
            fatal.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            settings.rate_window,
            settings.max_requests,
        ));
        let validator = Arc::new(Validator::new(Arc::clone(&transport), settings.limits));

        let chain = MiddlewareChain::new(Arc::new(AdmissionHandler::new(
            Arc::clone(&scheduler),
            settings.defaults,
        )))
        .layer(errors.clone())
        .layer(Arc::new(LoggingMiddleware))
        .layer(rate_limiter.clone())
        .layer(validator);

        let dispatcher = Arc::new(Dispatcher::new(transport, chain, errors, fatal));
        Self {
            dispatcher,
            scheduler,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Stop taking jobs and wait for the running ones.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
