use std::sync::Arc;

use {
    async_trait::async_trait,
    stickerbot_channels::ChatTransport,
    stickerbot_common::{Error, Result, StickerMetadata},
    stickerbot_media::ConversionEngine,
    tracing::debug,
};

use crate::{error_handler::ErrorHandler, job::Job, scheduler::JobRunner};

/// Converts a job's source and sends the sticker back to its chat.
pub struct StickerJobRunner {
    engine: Arc<ConversionEngine>,
    transport: Arc<dyn ChatTransport>,
    metadata: StickerMetadata,
    errors: Arc<ErrorHandler>,
}

impl StickerJobRunner {
    #[must_use]
    pub fn new(
        engine: Arc<ConversionEngine>,
        transport: Arc<dyn ChatTransport>,
        metadata: StickerMetadata,
        errors: Arc<ErrorHandler>,
    ) -> Self {
        Self {
            engine,
            transport,
            metadata,
            errors,
        }
    }
}

#[async_trait]
impl JobRunner for StickerJobRunner {
    async fn run(&self, job: &Job) -> Result<()> {
        let result = self.engine.convert(&job.source, &job.options).await?;
        debug!(
            bytes = result.data.len(),
            duration_ms = result.duration.as_millis() as u64,
            "sending sticker"
        );
        self.transport
            .send_sticker(job.origin.chat_id(), &result.into_media(), &self.metadata)
            .await?;
        Ok(())
    }

    async fn on_failure(&self, job: &Job, err: Error) -> Result<()> {
        self.errors.handle_error(err, &job.origin).await
    }
}
