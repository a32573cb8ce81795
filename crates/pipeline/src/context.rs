//! Per-message state threaded through the middleware chain.

use std::{fmt, time::Instant};

use stickerbot_common::{InboundMessage, MediaPayload};

use crate::scheduler::JobHandle;

/// Command prefixes understood by the bot.
pub mod commands {
    pub const HELP: &str = "!ajuda";
    pub const IMAGE: &str = "!imagem";
    pub const TEXT: &str = "!texto";
    pub const QUOTED_GIF: &str = "!gif";
}

/// What the sender asked for, as classified by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!imagem [quality=N] [size=N]` with attached media.
    Image { args: String },
    /// `!texto <text>`.
    Text { text: String },
    /// `!gif` in a group, converting the quoted message's media.
    QuotedMedia { args: String },
    /// Media sent in a private chat without any command.
    Implicit,
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Image { .. } => commands::IMAGE,
            Self::Text { .. } => commands::TEXT,
            Self::QuotedMedia { .. } => commands::QUOTED_GIF,
            Self::Implicit => "implicit",
        }
    }

    /// Option arguments that follow the command word.
    #[must_use]
    pub fn args(&self) -> &str {
        match self {
            Self::Image { args } | Self::QuotedMedia { args } => args,
            Self::Text { .. } | Self::Implicit => "",
        }
    }

    #[must_use]
    pub fn needs_media(&self) -> bool {
        !matches!(self, Self::Text { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of one inbound message while it passes the chain.
pub struct MessageContext {
    pub message: InboundMessage,
    pub command: Command,
    pub received_at: Instant,
    /// Message that carries the media to convert: the message itself, or the
    /// one it quotes for [`Command::QuotedMedia`]. `None` for text jobs.
    pub media_source: Option<InboundMessage>,
    /// Media downloaded by the validator, reused by the conversion.
    pub media: Option<MediaPayload>,
    /// Set by the admission handler once a job was submitted.
    pub admitted: Option<JobHandle>,
}

impl MessageContext {
    #[must_use]
    pub fn new(message: InboundMessage, command: Command) -> Self {
        let media_source = command.needs_media().then(|| message.clone());
        Self {
            message,
            command,
            received_at: Instant::now(),
            media_source,
            media: None,
            admitted: None,
        }
    }

    /// Convert the media of `quoted` instead of the message's own.
    #[must_use]
    pub fn with_media_source(mut self, quoted: InboundMessage) -> Self {
        self.media_source = Some(quoted);
        self
    }

    /// Identity the rate limiter keys on.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.message.sender()
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("message_id", &self.message.id)
            .field("user_id", &self.user_id())
            .field("command", &self.command)
            .field(
                "media_source",
                &self.media_source.as_ref().map(|m| m.id.as_str()),
            )
            .field("media", &self.media)
            .finish_non_exhaustive()
    }
}
