use std::time::Instant;

use {
    async_trait::async_trait,
    stickerbot_common::Result,
    tracing::{debug, info, warn},
};

use crate::{
    context::MessageContext,
    middleware::{Middleware, Next},
};

/// Logs each command and how long admission took.
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<()> {
        let started = Instant::now();
        debug!(
            user_id = ctx.user_id(),
            message_id = %ctx.message.id,
            command = %ctx.command,
            "processing command"
        );

        let result = next.run(ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let job_id = ctx.admitted.as_ref().map(|h| h.id().to_string());
        match &result {
            Ok(()) => info!(
                user_id = ctx.user_id(),
                command = %ctx.command,
                job_id = job_id.as_deref(),
                elapsed_ms,
                "command handled"
            ),
            Err(e) => warn!(
                user_id = ctx.user_id(),
                command = %ctx.command,
                elapsed_ms,
                error = %e,
                "command failed"
            ),
        }
        result
    }
}
