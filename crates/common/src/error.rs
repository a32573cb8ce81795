use std::{error::Error as StdError, fmt, time::Duration};

use {serde::Serialize, thiserror::Error};

/// Stable error codes, logged with every classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    RateLimitExceeded,
    UnsupportedFileType,
    FileTooLarge,
    StickerCreationFailed,
    WhatsappConnectionError,
    MessageSendFailed,
    InternalServerError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::UnsupportedFileType => "UNSUPPORTED_FILE_TYPE",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::StickerCreationFailed => "STICKER_CREATION_FAILED",
            Self::WhatsappConnectionError => "WHATSAPP_CONNECTION_ERROR",
            Self::MessageSendFailed => "MESSAGE_SEND_FAILED",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-kinds of business-rule failures (422-equivalent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessKind {
    UnsupportedFileType,
    FileTooLarge,
    StickerCreationFailed,
}

/// Sub-kinds of chat transport failures (503-equivalent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Connection,
    SendFailed,
}

/// Classified error taxonomy shared by the whole pipeline.
///
/// Every variant except [`Error::System`] is operational: it is caught at the
/// middleware boundary, translated to a fixed reply and never crashes the
/// process.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {message}")]
    Validation {
        message: String,
        field: Option<&'static str>,
    },

    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("{message}")]
    Business { kind: BusinessKind, message: String },

    #[error("transport error: {message}")]
    Transport {
        kind: TransportKind,
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error("internal error: {message}")]
    System {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    #[must_use]
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field),
        }
    }

    /// Admission denied; `retry_after` is rounded up to whole seconds.
    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        let secs = retry_after.as_millis().div_ceil(1000).max(1);
        Self::RateLimited {
            retry_after: Duration::from_secs(u64::try_from(secs).unwrap_or(u64::MAX)),
        }
    }

    #[must_use]
    pub fn unsupported_file_type(mimetype: &str) -> Self {
        Self::Business {
            kind: BusinessKind::UnsupportedFileType,
            message: format!("unsupported file type: {mimetype}"),
        }
    }

    #[must_use]
    pub fn file_too_large(size: usize, max: usize) -> Self {
        Self::Business {
            kind: BusinessKind::FileTooLarge,
            message: format!("file too large: {size} bytes (max {max})"),
        }
    }

    #[must_use]
    pub fn sticker_failed(message: impl Into<String>) -> Self {
        Self::Business {
            kind: BusinessKind::StickerCreationFailed,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            kind: TransportKind::Connection,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn send_failed(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            kind: TransportKind::SendFailed,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self::System {
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn other(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::System {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::InvalidInput,
            Self::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            Self::Business { kind, .. } => match kind {
                BusinessKind::UnsupportedFileType => ErrorCode::UnsupportedFileType,
                BusinessKind::FileTooLarge => ErrorCode::FileTooLarge,
                BusinessKind::StickerCreationFailed => ErrorCode::StickerCreationFailed,
            },
            Self::Transport { kind, .. } => match kind {
                TransportKind::Connection => ErrorCode::WhatsappConnectionError,
                TransportKind::SendFailed => ErrorCode::MessageSendFailed,
            },
            Self::System { .. } => ErrorCode::InternalServerError,
        }
    }

    /// HTTP-equivalent status, used only as a log field.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::RateLimited { .. } => 429,
            Self::Business { .. } => 422,
            Self::Transport { .. } => 503,
            Self::System { .. } => 500,
        }
    }

    #[must_use]
    pub fn is_operational(&self) -> bool {
        !matches!(self, Self::System { .. })
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// The fixed reply sent back to the chat for this kind of error.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.code() {
            ErrorCode::RateLimitExceeded => {
                let secs = self.retry_after().map_or(1, |d| d.as_secs());
                format!(
                    "⏰ Você está enviando muitas mensagens. Aguarde {secs}s antes de tentar novamente."
                )
            },
            ErrorCode::InvalidInput => {
                "❌ Formato inválido. Verifique sua mensagem e tente novamente.".into()
            },
            ErrorCode::UnsupportedFileType => {
                "📎 Tipo de arquivo não suportado. Envie uma imagem, GIF ou texto.".into()
            },
            ErrorCode::FileTooLarge => "📏 Arquivo muito grande. Envie um arquivo menor.".into(),
            ErrorCode::StickerCreationFailed => {
                "🚫 Não foi possível criar o sticker. Tente novamente com outro arquivo.".into()
            },
            ErrorCode::WhatsappConnectionError | ErrorCode::MessageSendFailed => {
                "📱 Problema de conexão com o WhatsApp. Tente novamente em alguns instantes.".into()
            },
            ErrorCode::InternalServerError => {
                "🔧 Estamos enfrentando problemas técnicos. Tente novamente mais tarde.".into()
            },
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::system(message)
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::other(source)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Shared context trait ────────────────────────────────────────────────────

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for your crate's error type, then invoke [`impl_context!`]
/// in your error module to get `.context()` and `.with_context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and `.with_context()`
/// methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/media/src/error.rs
/// stickerbot_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_wait_rounds_up_to_whole_seconds() {
        let err = Error::rate_limited(Duration::from_millis(1_200));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        let err = Error::rate_limited(Duration::from_millis(3_000));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn rate_limit_wait_is_never_zero() {
        let err = Error::rate_limited(Duration::ZERO);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn only_system_errors_are_non_operational() {
        assert!(Error::validation("x").is_operational());
        assert!(Error::rate_limited(Duration::from_secs(1)).is_operational());
        assert!(Error::sticker_failed("x").is_operational());
        assert!(Error::transport("x").is_operational());
        assert!(!Error::system("x").is_operational());
    }

    #[test]
    fn codes_and_statuses_follow_taxonomy() {
        let cases = [
            (Error::validation("x"), ErrorCode::InvalidInput, 400),
            (
                Error::rate_limited(Duration::from_secs(5)),
                ErrorCode::RateLimitExceeded,
                429,
            ),
            (
                Error::unsupported_file_type("application/pdf"),
                ErrorCode::UnsupportedFileType,
                422,
            ),
            (Error::file_too_large(11, 10), ErrorCode::FileTooLarge, 422),
            (
                Error::sticker_failed("x"),
                ErrorCode::StickerCreationFailed,
                422,
            ),
            (
                Error::transport("x"),
                ErrorCode::WhatsappConnectionError,
                503,
            ),
            (Error::system("x"), ErrorCode::InternalServerError, 500),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.code(), code, "{err}");
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[test]
    fn rate_limit_reply_mentions_wait() {
        let msg = Error::rate_limited(Duration::from_secs(42)).user_message();
        assert!(msg.contains("42s"));
    }

    #[test]
    fn code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::StickerCreationFailed).unwrap_or_default();
        assert_eq!(json, "\"STICKER_CREATION_FAILED\"");
        assert_eq!(ErrorCode::FileTooLarge.to_string(), "FILE_TOO_LARGE");
    }
}
