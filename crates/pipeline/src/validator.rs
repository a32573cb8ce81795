//! Structural and content validation of inbound messages.

use std::sync::Arc;

use {
    async_trait::async_trait,
    once_cell::sync::Lazy,
    regex::Regex,
    stickerbot_channels::ChatTransport,
    stickerbot_common::{Error, InboundMessage, MediaPayload, MessageType, Result},
    stickerbot_config::LimitsConfig,
    tracing::debug,
};

use {
    crate::{
        context::MessageContext,
        middleware::{Middleware, Next},
    },
    stickerbot_metrics::{admission, counter, labels},
};

/// Private user (`<digits>@c.us`) or group (`<digits>-<digits>@g.us`).
#[allow(clippy::expect_used)]
static SENDER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+@c\.us|\d+-\d+@g\.us)$").expect("valid sender regex"));

#[allow(clippy::expect_used)]
static UNSAFE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)<script\b[^>]*>.*?</script>",
        r"(?i)javascript:",
        r"(?i)\bon\w+\s*=",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid unsafe-content regex"))
    .collect()
});

/// Mimetypes accepted on image messages.
pub const IMAGE_MIMETYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Mimetypes accepted on document and video messages.
pub const DOCUMENT_MIMETYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "video/3gpp",
];

/// Size and length ceilings.
#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub image_max_bytes: usize,
    pub document_max_bytes: usize,
    pub body_max_chars: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            image_max_bytes: 10 * 1024 * 1024,
            document_max_bytes: 25 * 1024 * 1024,
            body_max_chars: 4096,
        }
    }
}

impl From<&LimitsConfig> for ValidationLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            image_max_bytes: config.image_max_bytes,
            document_max_bytes: config.document_max_bytes,
            body_max_chars: config.body_max_chars,
        }
    }
}

pub struct Validator {
    transport: Arc<dyn ChatTransport>,
    limits: ValidationLimits,
}

impl Validator {
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>, limits: ValidationLimits) -> Self {
        Self { transport, limits }
    }

    /// Check `ctx` and attach downloaded media to it.
    pub async fn validate(&self, ctx: &mut MessageContext) -> Result<()> {
        let declared = validate_structure(&ctx.message)?;
        if declared == MessageType::Chat {
            self.check_body(&ctx.message.body)?;
        }

        let Some(source) = ctx.media_source.as_ref() else {
            return Ok(());
        };
        let source_type = if source.id == ctx.message.id {
            declared
        } else {
            validate_structure(source)?
        };
        ctx.media = self.check_media(source, source_type).await?;
        Ok(())
    }

    fn check_body(&self, body: &str) -> Result<()> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_field("body", "message body is empty"));
        }
        let chars = body.chars().count();
        if chars > self.limits.body_max_chars {
            return Err(Error::invalid_field(
                "body",
                format!(
                    "message body has {chars} characters (max {})",
                    self.limits.body_max_chars
                ),
            ));
        }
        if UNSAFE_PATTERNS.iter().any(|p| p.is_match(body)) {
            return Err(Error::invalid_field(
                "body",
                "message body contains unsafe content",
            ));
        }
        Ok(())
    }

    /// Download and check media according to the declared type of `source`.
    async fn check_media(
        &self,
        source: &InboundMessage,
        declared: MessageType,
    ) -> Result<Option<MediaPayload>> {
        let (whitelist, max_bytes) = match declared {
            MessageType::Image => (IMAGE_MIMETYPES, self.limits.image_max_bytes),
            MessageType::Document | MessageType::Video => {
                (DOCUMENT_MIMETYPES, self.limits.document_max_bytes)
            },
            // Already a sticker; convert whatever the platform hands back.
            MessageType::Sticker => return self.download(source).await,
            MessageType::Notification => return Ok(None),
            MessageType::Chat => {
                return Err(Error::invalid_field("media", "message carries no media"));
            },
            other => return Err(Error::unsupported_file_type(other.as_str())),
        };

        let media = self
            .download(source)
            .await?
            .ok_or_else(|| Error::invalid_field("media", "media could not be downloaded"))?;

        let essence = media.essence();
        if !whitelist.contains(&essence.as_str()) {
            return Err(Error::unsupported_file_type(&essence));
        }
        if media.len() > max_bytes {
            return Err(Error::file_too_large(media.len(), max_bytes));
        }
        debug!(
            message_id = %source.id,
            mimetype = %essence,
            bytes = media.len(),
            "media accepted"
        );
        Ok(Some(media))
    }

    async fn download(&self, source: &InboundMessage) -> Result<Option<MediaPayload>> {
        Ok(self.transport.download_media(source).await?)
    }
}

/// Id, sender grammar and declared type.
pub fn validate_structure(message: &InboundMessage) -> Result<MessageType> {
    if message.id.trim().is_empty() {
        return Err(Error::invalid_field("id", "message id is empty"));
    }
    if !SENDER_ID.is_match(&message.from) {
        return Err(Error::invalid_field(
            "from",
            format!("invalid sender id: {}", message.from),
        ));
    }
    if let Some(author) = &message.author
        && !SENDER_ID.is_match(author)
    {
        return Err(Error::invalid_field(
            "author",
            format!("invalid author id: {author}"),
        ));
    }
    message
        .message_type
        .parse::<MessageType>()
        .map_err(|e| Error::invalid_field("type", e))
}

#[async_trait]
impl Middleware for Validator {
    fn name(&self) -> &'static str {
        "validator"
    }

    async fn handle(&self, ctx: &mut MessageContext, next: Next<'_>) -> Result<()> {
        if let Err(err) = self.validate(ctx).await {
            counter!(
                admission::VALIDATION_FAILURES_TOTAL,
                labels::ERROR_CODE => err.code().as_str()
            )
            .increment(1);
            return Err(err);
        }
        next.run(ctx).await
    }
}
