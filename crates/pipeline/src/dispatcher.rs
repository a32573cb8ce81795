//! Entry point for transport events.

use std::sync::Arc;

use {
    async_trait::async_trait,
    stickerbot_channels::{ChatTransport, EventReceiver, TransportEvent},
    stickerbot_common::{Error, InboundMessage, Result},
    stickerbot_media::{ConversionOptions, StickerSource},
    tokio::task::JoinSet,
    tracing::{debug, error, info, warn},
};

use {
    crate::{
        context::{Command, MessageContext},
        error_handler::ErrorHandler,
        job::{Job, JobStatus},
        middleware::{Handler, MiddlewareChain},
        router::{self, GROUP_GREETING, HELP_TEXT, Route, rejections},
        scheduler::{FatalSender, JobHandle, Scheduler},
    },
    stickerbot_metrics::{counter, labels, transport},
};

/// Terminal handler: turns an admitted context into a job.
pub struct AdmissionHandler {
    scheduler: Arc<Scheduler>,
    defaults: ConversionOptions,
}

impl AdmissionHandler {
    #[must_use]
    pub fn new(scheduler: Arc<Scheduler>, defaults: ConversionOptions) -> Self {
        Self {
            scheduler,
            defaults,
        }
    }
}

#[async_trait]
impl Handler for AdmissionHandler {
    async fn call(&self, ctx: &mut MessageContext) -> Result<()> {
        let source = match &ctx.command {
            Command::Text { text } => StickerSource::Text(text.clone()),
            Command::Image { .. } | Command::QuotedMedia { .. } | Command::Implicit => {
                let media = ctx
                    .media
                    .take()
                    .ok_or_else(|| Error::sticker_failed("no media to convert"))?;
                StickerSource::from_media(media)?
            },
        };
        let overrides = router::parse_overrides(ctx.command.args())?;
        let options = ConversionOptions::resolve(overrides, self.defaults)?;

        let mut job = Job::new(source, options, ctx.message.clone());
        job.advance(JobStatus::Validated);
        ctx.admitted = Some(self.scheduler.submit(job)?);
        Ok(())
    }
}

/// What happened to one event.
#[derive(Debug)]
pub enum Dispatch {
    Ignored,
    Help,
    /// An explicit command was refused with a direct reply.
    Rejected,
    Greeted,
    /// The chain ran and answered without creating a job.
    Handled,
    Admitted(JobHandle),
}

pub struct Dispatcher {
    transport: Arc<dyn ChatTransport>,
    chain: MiddlewareChain,
    errors: Arc<ErrorHandler>,
    fatal: Option<FatalSender>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        chain: MiddlewareChain,
        errors: Arc<ErrorHandler>,
        fatal: Option<FatalSender>,
    ) -> Self {
        Self {
            transport,
            chain,
            errors,
            fatal,
        }
    }

    /// Handle events until the transport closes the stream. Each event runs
    /// on its own task so a slow media download does not hold up others.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver) {
        let mut tasks = JoinSet::new();
        while let Some(event) = events.recv().await {
            while tasks.try_join_next().is_some() {}
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                this.handle_event(event).await;
            });
        }
        while tasks.join_next().await.is_some() {}
        info!("transport event stream closed");
    }

    pub async fn handle_event(&self, event: TransportEvent) -> Dispatch {
        match event {
            TransportEvent::Message { message } => self.handle_message(message).await,
            TransportEvent::GroupJoin { chat_id } => {
                info!(chat_id = %chat_id, "added to group");
                if let Err(e) = self.transport.send_text(&chat_id, GROUP_GREETING).await {
                    counter!(transport::SEND_ERRORS_TOTAL).increment(1);
                    warn!(chat_id = %chat_id, error = %e, "failed to send group greeting");
                }
                Dispatch::Greeted
            },
            TransportEvent::Qr { .. } => {
                info!("waiting for QR code pairing");
                Dispatch::Ignored
            },
            TransportEvent::Ready => {
                info!(transport = self.transport.id(), "transport ready");
                Dispatch::Ignored
            },
            TransportEvent::Disconnected { reason } => {
                warn!(transport = self.transport.id(), %reason, "transport disconnected");
                Dispatch::Ignored
            },
        }
    }

    pub async fn handle_message(&self, message: InboundMessage) -> Dispatch {
        counter!(
            transport::MESSAGES_RECEIVED_TOTAL,
            labels::MESSAGE_TYPE => message.message_type.clone()
        )
        .increment(1);
        debug!(
            message_id = %message.id,
            from = %message.from,
            message_type = %message.message_type,
            has_media = message.has_media,
            "message received"
        );

        match router::classify(&message) {
            Route::Ignore => Dispatch::Ignored,
            Route::Help => {
                self.reply(&message, HELP_TEXT).await;
                info!(user_id = message.sender(), "help requested");
                Dispatch::Help
            },
            Route::Reject(text) => {
                info!(user_id = message.sender(), message_id = %message.id, "command rejected");
                self.reply(&message, text).await;
                Dispatch::Rejected
            },
            Route::Convert(command) => self.admit(MessageContext::new(message, command)).await,
            Route::Quoted { args } => match self.transport.quoted_message(&message).await {
                Ok(Some(quoted)) if quoted.has_media => {
                    let ctx = MessageContext::new(message, Command::QuotedMedia { args })
                        .with_media_source(quoted);
                    self.admit(ctx).await
                },
                Ok(_) => {
                    info!(
                        user_id = message.sender(),
                        message_id = %message.id,
                        "quoted message has no media"
                    );
                    self.reply(&message, rejections::GIF_WITHOUT_QUOTED_MEDIA)
                        .await;
                    Dispatch::Rejected
                },
                Err(e) => {
                    if let Err(fatal) = self.errors.handle_error(Error::from(e), &message).await {
                        self.raise_fatal(fatal);
                    }
                    Dispatch::Handled
                },
            },
        }
    }

    async fn admit(&self, mut ctx: MessageContext) -> Dispatch {
        match self.chain.execute(&mut ctx).await {
            Ok(()) => match ctx.admitted.take() {
                Some(handle) => Dispatch::Admitted(handle),
                None => Dispatch::Handled,
            },
            Err(err) => {
                self.raise_fatal(err);
                Dispatch::Handled
            },
        }
    }

    async fn reply(&self, message: &InboundMessage, text: &str) {
        match self.transport.reply(message, text).await {
            Ok(()) => counter!(transport::REPLIES_SENT_TOTAL).increment(1),
            Err(e) => {
                counter!(transport::SEND_ERRORS_TOTAL).increment(1);
                warn!(message_id = %message.id, error = %e, "failed to send reply");
            },
        }
    }

    fn raise_fatal(&self, err: Error) {
        error!(error = %err, code = %err.code(), "fatal error while handling message");
        if let Some(fatal) = &self.fatal {
            let _ = fatal.send(err);
        }
    }
}
