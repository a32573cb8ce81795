//! Outermost layer: log, reply, and decide whether an error is fatal.

use std::sync::Arc;

use {
    async_trait::async_trait,
    stickerbot_channels::ChatTransport,
    stickerbot_common::{Error, InboundMessage, Result},
    tracing::{error, warn},
};

use {
    crate::{
        context::MessageContext,
        middleware::{Middleware, Next},
    },
    stickerbot_metrics::{counter, labels, transport},
};

/// Longest body excerpt written to logs.
const BODY_PREVIEW_CHARS: usize = 100;

pub struct ErrorHandler {
    transport: Arc<dyn ChatTransport>,
}

impl ErrorHandler {
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    /// Log `err` with the message context and answer the sender.
    ///
    /// Operational errors end here. Non-operational ones are handed back so
    /// the caller can stop the process.
    pub async fn handle_error(&self, err: Error, message: &InboundMessage) -> Result<()> {
        let code = err.code();
        let operational = err.is_operational();
        let severe = !operational || matches!(err, Error::Transport { .. });
        if severe {
            error!(
                user_id = message.sender(),
                message_id = %message.id,
                message_type = %message.message_type,
                body = message.body_preview(BODY_PREVIEW_CHARS),
                code = %code,
                status = err.status_code(),
                operational,
                error = %err,
                "request failed"
            );
        } else {
            warn!(
                user_id = message.sender(),
                message_id = %message.id,
                message_type = %message.message_type,
                body = message.body_preview(BODY_PREVIEW_CHARS),
                code = %code,
                status = err.status_code(),
                error = %err,
                "request rejected"
            );
        }

        match self.transport.reply(message, &err.user_message()).await {
            Ok(()) => {
                counter!(transport::REPLIES_SENT_TOTAL, labels::ERROR_CODE => code.as_str())
                    .increment(1);
            },
            Err(e) => {
                counter!(transport::SEND_ERRORS_TOTAL).increment(1);
                warn!(message_id = %message.id, error = %e, "failed to send error reply");
            },
        }

        if operational {
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl Middleware for ErrorHandler {
    fn name(&self) -> &'static str {
        "error_handler"
    }

    async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<()> {
        match next.run(ctx).await {
            Ok(()) => Ok(()),
            Err(err) => self.handle_error(err, &ctx.message).await,
        }
    }
}
