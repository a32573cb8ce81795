use std::{error::Error as StdError, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("{message}")]
    InvalidInput { message: String },
    #[error("unsupported media type: {mimetype}")]
    UnsupportedFormat { mimetype: String },
    #[error("transcoder failed: {message}")]
    Transcoder { message: String },
    #[error("transcoder timed out after {}s", elapsed.as_secs())]
    Timeout { elapsed: Duration },
    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transcoder(message: impl Into<String>) -> Self {
        Self::Transcoder {
            message: message.into(),
        }
    }
}

impl stickerbot_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

stickerbot_common::impl_context!();

/// Conversion failures are business errors: out-of-range options are bad
/// input, an unknown media type is unsupported, everything else means the
/// sticker could not be produced.
impl From<Error> for stickerbot_common::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput { message } => Self::validation(message),
            Error::UnsupportedFormat { mimetype } => Self::unsupported_file_type(&mimetype),
            other => Self::sticker_failed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
