use std::error::Error as StdError;

/// Crate-wide result type for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed transport errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid transport input: {message}")]
    InvalidInput { message: String },

    /// The transport is not connected or not ready yet.
    #[error("transport unavailable: {message}")]
    Unavailable { message: String },

    /// The remote side did not answer in time.
    #[error("transport request timed out: {operation}")]
    Timeout { operation: String },

    /// The remote side answered with an error.
    #[error("transport request failed: {message}")]
    Remote { message: String },

    /// Wrapped source error from an external dependency.
    #[error("transport operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn remote(message: impl std::fmt::Display) -> Self {
        Self::Remote {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Connection problems map to `WHATSAPP_CONNECTION_ERROR`, failed requests
/// to `MESSAGE_SEND_FAILED`.
impl From<Error> for stickerbot_common::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Unavailable { .. } | Error::Timeout { .. } => Self::transport(err.to_string()),
            Error::InvalidInput { message } => Self::validation(message),
            other => Self::send_failed("transport request failed", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, stickerbot_common::ErrorCode};

    #[test]
    fn classification() {
        let code = |e: Error| stickerbot_common::Error::from(e).code();
        assert_eq!(
            code(Error::unavailable("not ready")),
            ErrorCode::WhatsappConnectionError
        );
        assert_eq!(
            code(Error::Timeout {
                operation: "reply".into()
            }),
            ErrorCode::WhatsappConnectionError
        );
        assert_eq!(code(Error::remote("rejected")), ErrorCode::MessageSendFailed);
        assert_eq!(code(Error::invalid_input("bad id")), ErrorCode::InvalidInput);
    }
}
